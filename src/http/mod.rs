//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, routes)
//!     → request.rs (request ID, path segments → InboundRequest)
//!     → proxy core (cache lookup / origin relay / fallback)
//!     → response.rs (end-to-end headers, x-cache)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{CacheStatus, X_CACHE};
pub use server::HttpServer;
