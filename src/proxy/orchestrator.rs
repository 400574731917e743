//! Cache-aware proxy orchestration.
//!
//! ```text
//! handle(inbound)
//!     → CacheKey::derive(protocol, url)
//!     → CacheStore::lookup ── hit ──▶ body streamed from disk (long-lived cache-control)
//!     │ miss
//!     → OriginFetcher::fetch(raw) ── error ──▶ fallback placeholder
//!     │ 200/201/202
//!     → ResponseRelay::relay ──▶ client
//!          └─ PersistTap observes the relay, then CacheStore::store_in_background
//!               buffered: identity body that completed within the tee limit
//!               refetch:  everything else (decompressing second fetch)
//! ```

use axum::body::Body;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use crate::cache::entry::media_type;
use crate::cache::{BodySource, CacheEntry, CacheKey, CacheStore};
use crate::config::ProxyConfig;
use crate::http::response::CacheStatus;
use crate::observability::metrics;
use crate::proxy::fallback::Fallback;
use crate::proxy::fetcher::{Decoding, OriginFetcher};
use crate::proxy::relay::{RelayObserver, RelayOutcome, ResponseRelay};
use crate::proxy::types::{InboundRequest, OriginResponse, ResourceRequest, SetupError};

/// The proxy-and-cache core. Cheap to clone; clones share pools and state.
#[derive(Debug, Clone)]
pub struct CacheProxy {
    fetcher: OriginFetcher,
    store: CacheStore,
    relay: ResponseRelay,
    fallback: Arc<Fallback>,
    hit_cache_control: HeaderValue,
    tee_limit: usize,
}

impl CacheProxy {
    /// Assemble the core from configuration.
    ///
    /// Builds the process-wide outbound pools once and prepares the cache
    /// directory when asked to.
    pub fn new(config: &ProxyConfig) -> Result<Self, SetupError> {
        let fetcher = OriginFetcher::new(&config.upstream)?;
        let store = CacheStore::new(config.cache.dir.clone(), fetcher.clone());
        if config.cache.create_dir {
            store.prepare().map_err(|source| SetupError::CacheDir {
                path: config.cache.dir.clone(),
                source,
            })?;
        }

        let hit_cache_control = HeaderValue::from_str(&config.cache.hit_cache_control).map_err(|_| {
            SetupError::InvalidHeader {
                field: "cache.hit_cache_control",
            }
        })?;

        Ok(Self {
            fetcher,
            relay: ResponseRelay::new(hit_cache_control.clone()),
            store,
            fallback: Arc::new(Fallback::from_config(&config.fallback)?),
            hit_cache_control,
            tee_limit: config.cache.tee_limit_bytes,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Serve a resource from cache, or relay it from the origin and persist it.
    pub async fn handle(&self, inbound: InboundRequest) -> Response {
        let key = inbound.cache_key();
        if let Some(entry) = self.store.lookup(&key).await {
            return self.hit_response(entry);
        }

        let Some(origin) = self.open_origin(&inbound).await else {
            return self.fallback_response();
        };

        // HEAD carries no body worth keeping.
        let persist = inbound.method != Method::HEAD;
        let observer = persist.then(|| self.persist_tap(key, &inbound, &origin));
        let status = if persist { CacheStatus::Miss } else { CacheStatus::Bypass };

        tracing::debug!(key = %key, identity = %inbound.identity(), status = status.as_str(), "Relaying from origin");
        let mut response = self.relay.relay(origin, observer);
        status.apply(response.headers_mut());
        response
    }

    /// Relay a resource without consulting or filling the cache.
    pub async fn pass_through(&self, inbound: InboundRequest) -> Response {
        let Some(origin) = self.open_origin(&inbound).await else {
            return self.fallback_response();
        };

        let mut response = self.relay.relay(origin, None);
        CacheStatus::Bypass.apply(response.headers_mut());
        response
    }

    async fn open_origin(&self, inbound: &InboundRequest) -> Option<OriginResponse> {
        let request = match ResourceRequest::from_inbound(inbound) {
            Ok(request) => request,
            Err(e) => {
                tracing::info!(error = %e, "Rejecting unusable target");
                metrics::record_origin_fetch(e.outcome());
                return None;
            }
        };
        self.fetcher.fetch(&request, Decoding::Raw).await.ok()
    }

    fn persist_tap(
        &self,
        key: CacheKey,
        inbound: &InboundRequest,
        origin: &OriginResponse,
    ) -> Box<dyn RelayObserver> {
        let content_type = media_type(origin.headers().get(header::CONTENT_TYPE));
        let fits = origin
            .content_length()
            .map_or(true, |len| len <= self.tee_limit as u64);
        let buffer = (origin.is_identity_encoded() && fits && self.tee_limit > 0).then(BytesMut::new);

        // Re-fetches never forward the client's Accept-Encoding.
        let mut request = inbound.clone();
        request.accept_encoding = None;

        Box::new(PersistTap {
            store: self.store.clone(),
            key,
            content_type,
            request,
            buffer,
            limit: self.tee_limit,
        })
    }

    fn hit_response(&self, entry: CacheEntry) -> Response {
        let content_type = entry.content_type.clone();
        let content_length = HeaderValue::from(entry.body_len);
        let mut response = Response::new(Body::from_stream(entry.into_body_stream()));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, content_type);
        headers.insert(header::CONTENT_LENGTH, content_length);
        headers.insert(header::CACHE_CONTROL, self.hit_cache_control.clone());
        CacheStatus::Hit.apply(headers);
        response
    }

    fn fallback_response(&self) -> Response {
        metrics::record_fallback();
        let mut response = self.fallback.response();
        CacheStatus::Fallback.apply(response.headers_mut());
        response
    }
}

/// Watches a relay and persists the resource once it ends.
struct PersistTap {
    store: CacheStore,
    key: CacheKey,
    content_type: String,
    request: InboundRequest,
    /// Copy of the relayed body while it stays identity-encoded and small.
    buffer: Option<BytesMut>,
    limit: usize,
}

impl PersistTap {
    fn into_source(self, outcome: RelayOutcome) -> Option<BodySource> {
        match (outcome, self.buffer) {
            (RelayOutcome::Complete, Some(buffer)) => Some(BodySource::Buffered(buffer.freeze())),
            _ => ResourceRequest::from_inbound(&self.request)
                .ok()
                .map(BodySource::Refetch),
        }
    }
}

impl RelayObserver for PersistTap {
    fn on_chunk(&mut self, chunk: &Bytes) {
        if let Some(buffer) = self.buffer.as_mut() {
            if buffer.len() + chunk.len() > self.limit {
                tracing::debug!(key = %self.key, limit = self.limit, "Body exceeds tee limit, will re-fetch");
                self.buffer = None;
            } else {
                buffer.extend_from_slice(chunk);
            }
        }
    }

    fn on_finish(self: Box<Self>, outcome: RelayOutcome) {
        let store = self.store.clone();
        let key = self.key;
        let content_type = self.content_type.clone();
        if let Some(source) = self.into_source(outcome) {
            tracing::debug!(key = %key, ?outcome, mode = source.mode(), "Persisting relayed resource");
            store.store_in_background(key, content_type, source);
        }
    }
}
