//! Proxy-and-cache core.
//!
//! # Data Flow
//! ```text
//! InboundRequest (from http front-end)
//!     → orchestrator.rs (lookup → fetch → relay → persist)
//!     → fetcher.rs (one outbound request, raw or decompressing)
//!     → relay.rs (status + headers, then streamed body)
//!     → fallback.rs (static placeholder when nothing else answers)
//! ```
//!
//! # Design Decisions
//! - One task per inbound request; the cache directory is the only shared
//!   mutable state
//! - Every origin failure becomes the fallback response, never an error
//! - Persistence runs detached and survives client disconnects

pub mod fallback;
pub mod fetcher;
pub mod orchestrator;
pub mod relay;
pub mod types;

pub use fallback::Fallback;
pub use fetcher::{Decoding, OriginFetcher, ALLOWED_STATUSES};
pub use orchestrator::CacheProxy;
pub use relay::{RelayObserver, RelayOutcome, ResponseRelay};
pub use types::{FetchError, InboundRequest, OriginResponse, ResourceRequest, SetupError};
