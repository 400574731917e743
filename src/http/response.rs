//! Response handling and transformation.
//!
//! # Responsibilities
//! - Copy end-to-end origin headers onto the client response
//! - Tag every response with its cache disposition (`x-cache`)
//!
//! # Design Decisions
//! - Hop-by-hop headers are never forwarded; the server applies its own
//!   framing, so chunked origins stay chunked toward the client
//! - Duplicate headers are appended, never overwritten

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Header reporting how the response was produced.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the on-disk cache.
    Hit,
    /// Relayed from the origin and queued for persistence.
    Miss,
    /// Relayed from the origin without persistence.
    Bypass,
    /// Placeholder served because neither cache nor origin answered.
    Fallback,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
            CacheStatus::Fallback => "FALLBACK",
        }
    }

    /// Set `x-cache` on a response header map.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_CACHE, HeaderValue::from_static(self.as_str()));
    }
}

/// Connection-scoped headers that must not cross the proxy.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Append every end-to-end header of `source` to `target`.
pub fn copy_end_to_end_headers(source: &HeaderMap, target: &mut HeaderMap) {
    for (name, value) in source.iter() {
        if !is_hop_by_hop(name) {
            target.append(name.clone(), value.clone());
        }
    }
}
