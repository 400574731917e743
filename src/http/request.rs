//! Request handling and normalization.
//!
//! # Responsibilities
//! - Tag every request with an `x-request-id` (UUID v4) as early as possible
//! - Turn routed path segments into an [`InboundRequest`] for the core
//!
//! # Design Decisions
//! - Path segments are used verbatim; the query string is appended to the
//!   url so it becomes part of the resource identity
//! - Only the method and Accept-Encoding of the client request reach the core

use axum::http::request::Parts;
use axum::http::HeaderName;

use crate::proxy::InboundRequest;

/// Correlation header set on requests and echoed on responses.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Append the request's query string (if any) to a routed url segment.
pub fn url_with_query(url: &str, parts: &Parts) -> String {
    match parts.uri.query() {
        Some(query) => format!("{}?{}", url, query),
        None => url.to_string(),
    }
}

/// Normalize a routed request into the core's input.
pub fn inbound_request(protocol: &str, url: &str, parts: &Parts) -> InboundRequest {
    InboundRequest::new(parts.method.clone(), protocol, url_with_query(url, parts))
        .with_accept_encoding(&parts.headers)
}
