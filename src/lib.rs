//! Streaming HTTP reverse proxy with an on-disk response cache.

// Core subsystems
pub mod cache;
pub mod config;
pub mod http;
pub mod proxy;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use cache::{CacheKey, CacheStore};
pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::CacheProxy;
