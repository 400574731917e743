//! On-disk response cache.
//!
//! # Data Flow
//! ```text
//! (protocol, url)
//!     → key.rs (truncated SHA-256, hex file name)
//!     → store.rs lookup: open file → entry.rs header → hit (streamed body) | absent
//!
//! origin response relayed to client
//!     → store.rs store: entry.rs header + body (buffered or re-fetched)
//!     → temp file → rename to <cache_dir>/<key>
//! ```
//!
//! # Design Decisions
//! - Unbounded and non-expiring; entries are removed out-of-band only
//! - Stored bodies are always uncompressed
//! - Read failures degrade to a miss, write failures to a log line

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, EntryError, HEADER_LENGTH};
pub use key::CacheKey;
pub use store::{BodySource, CacheError, CacheStore};
