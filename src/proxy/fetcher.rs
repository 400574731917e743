//! Origin fetching.
//!
//! # Responsibilities
//! - Own the outbound connection pools for the whole process
//! - Issue exactly one request per fetch, bounded by the fetch timeout
//! - Accept only 200/201/202; everything else is a `FetchError`
//!
//! # Design Decisions
//! - Two clients share one configuration: `raw` never decompresses so the
//!   relayed bytes match the origin's Content-Length, `decoding` does so
//!   cached copies are always stored uncompressed
//! - The timeout covers status line and headers only; body streaming is
//!   bounded by the client going away, not by a deadline

use axum::http::{header, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::UpstreamConfig;
use crate::observability::metrics;
use crate::proxy::types::{FetchError, OriginResponse, ResourceRequest};

/// Statuses treated as a successful, cacheable origin answer.
pub const ALLOWED_STATUSES: [StatusCode; 3] = [StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED];

/// Whether a fetch should decompress the origin body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    /// Bytes exactly as sent by the origin.
    Raw,
    /// Content-Encoding removed by the client.
    Decompress,
}

/// Outbound HTTP client for origins.
#[derive(Debug, Clone)]
pub struct OriginFetcher {
    raw: Client,
    decoding: Client,
    fetch_timeout: Duration,
}

impl OriginFetcher {
    /// Build both connection pools from configuration.
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let builder = || {
            let builder = Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
                .user_agent(config.user_agent.clone());
            if config.use_system_proxy {
                builder
            } else {
                builder.no_proxy()
            }
        };

        let raw = builder().no_gzip().no_brotli().no_deflate().build()?;
        let decoding = builder().gzip(true).brotli(true).deflate(true).build()?;

        Ok(Self {
            raw,
            decoding,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        })
    }

    /// Open one request to the origin.
    ///
    /// On success the returned response still holds the connection; the
    /// caller owns it until the body is consumed or dropped.
    pub async fn fetch(
        &self,
        request: &ResourceRequest,
        decoding: Decoding,
    ) -> Result<OriginResponse, FetchError> {
        let result = self.send(request, decoding).await;
        match &result {
            Ok(response) => {
                tracing::debug!(
                    method = %request.method,
                    target = %request.target,
                    status = %response.status(),
                    ?decoding,
                    "Origin responded"
                );
                metrics::record_origin_fetch("ok");
            }
            Err(e) => {
                tracing::info!(
                    method = %request.method,
                    target = %request.target,
                    error = %e,
                    ?decoding,
                    "Origin fetch failed"
                );
                metrics::record_origin_fetch(e.outcome());
            }
        }
        result
    }

    async fn send(
        &self,
        request: &ResourceRequest,
        decoding: Decoding,
    ) -> Result<OriginResponse, FetchError> {
        let client = match decoding {
            Decoding::Raw => &self.raw,
            Decoding::Decompress => &self.decoding,
        };

        let mut builder = client.request(request.method.clone(), request.target.clone());
        if decoding == Decoding::Raw {
            if let Some(accept_encoding) = &request.accept_encoding {
                builder = builder.header(header::ACCEPT_ENCODING, accept_encoding.clone());
            }
        }

        let response = match timeout(self.fetch_timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(FetchError::Unreachable(e)),
            Err(_) => return Err(FetchError::Timeout(self.fetch_timeout)),
        };

        let status = response.status();
        if !ALLOWED_STATUSES.contains(&status) {
            return Err(FetchError::Rejected(status));
        }

        Ok(OriginResponse::from_reqwest(response))
    }
}
