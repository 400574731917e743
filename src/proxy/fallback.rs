//! Placeholder served when neither the cache nor the origin can answer.

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use bytes::Bytes;

use crate::config::FallbackConfig;
use crate::proxy::types::SetupError;

/// Built-in placeholder image.
const PLACEHOLDER_SVG: &[u8] = include_bytes!("../../assets/placeholder.svg");

/// The static fallback resource, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Fallback {
    body: Bytes,
    content_type: HeaderValue,
    cache_control: HeaderValue,
}

impl Fallback {
    pub fn from_config(config: &FallbackConfig) -> Result<Self, SetupError> {
        let body = match &config.path {
            Some(path) => Bytes::from(std::fs::read(path).map_err(|source| SetupError::Fallback {
                path: path.clone(),
                source,
            })?),
            None => Bytes::from_static(PLACEHOLDER_SVG),
        };

        let content_type = HeaderValue::from_str(&config.content_type).map_err(|_| {
            SetupError::InvalidHeader {
                field: "fallback.content_type",
            }
        })?;
        let cache_control = HeaderValue::from_str(&config.cache_control).map_err(|_| {
            SetupError::InvalidHeader {
                field: "fallback.cache_control",
            }
        })?;

        Ok(Self {
            body,
            content_type,
            cache_control,
        })
    }

    /// A fresh 200 response carrying the placeholder.
    pub fn response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, self.content_type.clone());
        headers.insert(header::CACHE_CONTROL, self.cache_control.clone());
        response
    }
}
