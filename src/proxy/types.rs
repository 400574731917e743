//! Core request/response types and proxy error definitions.

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use hyper::ext::ReasonPhrase;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cache::CacheKey;

/// Origin body as a boxed byte stream.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Errors produced while contacting an origin.
///
/// None of these reach the client: the orchestrator answers every one of
/// them with the fallback placeholder.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("origin answered with disallowed status {0}")]
    Rejected(StatusCode),

    #[error("origin unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("origin did not answer within {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Short label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            FetchError::InvalidTarget { .. } => "invalid_target",
            FetchError::Rejected(_) => "rejected",
            FetchError::Unreachable(_) => "unreachable",
            FetchError::Timeout(_) => "timeout",
        }
    }
}

/// Errors raised while assembling the proxy at startup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to build origin client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to read fallback file {path:?}: {source}")]
    Fallback {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare cache directory {path:?}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{field} is not a valid header value")]
    InvalidHeader { field: &'static str },
}

/// Normalized request handed over by the HTTP front-end.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Scheme of the origin, e.g. `https`.
    pub protocol: String,
    /// Host and path of the origin, including any query string.
    pub url: String,
    /// Client's Accept-Encoding, forwarded on the relay fetch only.
    pub accept_encoding: Option<HeaderValue>,
}

impl InboundRequest {
    /// Build from the pieces the router extracted.
    pub fn new(method: Method, protocol: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method,
            protocol: protocol.into(),
            url: url.into(),
            accept_encoding: None,
        }
    }

    /// Attach the client's Accept-Encoding header.
    pub fn with_accept_encoding(mut self, headers: &HeaderMap) -> Self {
        self.accept_encoding = headers.get(header::ACCEPT_ENCODING).cloned();
        self
    }

    /// `<protocol>://<url>`, the logical identity of the resource.
    pub fn identity(&self) -> String {
        format!("{}://{}", self.protocol, self.url)
    }

    /// Cache key for this resource. Ignores method and client headers.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.protocol, &self.url)
    }
}

/// A validated outbound request.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub target: Url,
    pub accept_encoding: Option<HeaderValue>,
}

impl ResourceRequest {
    /// Parse `target` into an absolute http(s) URL.
    pub fn new(method: Method, target: &str) -> Result<Self, FetchError> {
        let invalid = |reason: String| FetchError::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self {
            method,
            target: url,
            accept_encoding: None,
        })
    }

    /// Build from an inbound request.
    pub fn from_inbound(inbound: &InboundRequest) -> Result<Self, FetchError> {
        let mut request = Self::new(inbound.method.clone(), &inbound.identity())?;
        request.accept_encoding = inbound.accept_encoding.clone();
        Ok(request)
    }
}

/// A live origin response with an unread body.
///
/// Dropping it closes the upstream connection (or returns it to the pool
/// once the body is drained).
pub struct OriginResponse {
    inner: reqwest::Response,
    reason: Option<ReasonPhrase>,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.inner.status())
            .field("reason", &self.reason.as_ref().map(|r| String::from_utf8_lossy(r.as_bytes())))
            .finish()
    }
}

impl OriginResponse {
    pub(crate) fn from_reqwest(inner: reqwest::Response) -> Self {
        let reason = inner.extensions().get::<ReasonPhrase>().cloned();
        Self { inner, reason }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Non-canonical reason phrase sent by the origin, if any.
    pub fn reason(&self) -> Option<&ReasonPhrase> {
        self.reason.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// True when the body is sent without a content coding.
    pub fn is_identity_encoded(&self) -> bool {
        self.headers()
            .get_all(header::CONTENT_ENCODING)
            .iter()
            .all(|v| v.to_str().map_or(false, |s| s.trim().eq_ignore_ascii_case("identity")))
    }

    /// Declared body length, if the origin sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Hand over the body as a stream of chunks.
    pub fn into_body_stream(self) -> BodyStream {
        Box::pin(self.inner.bytes_stream())
    }
}
