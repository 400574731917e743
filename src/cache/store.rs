//! Key-addressed entry files in the cache directory.
//!
//! # Responsibilities
//! - Look entries up, treating anything unreadable or malformed as absent
//! - Persist entries from an in-memory body or a decompressing re-fetch
//! - Never let a persistence failure reach the client-facing request
//!
//! # Design Decisions
//! - Writes go to a uniquely named temp file in the same directory and are
//!   renamed into place: readers never observe a torn entry and concurrent
//!   writers resolve as last-rename-wins
//! - No locking and no eviction; entries live until removed externally

use axum::http::header;
use bytes::Bytes;
use futures_util::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::cache::entry::{decode_header, encode_header, CacheEntry, EntryError, HEADER_LENGTH};
use crate::cache::key::CacheKey;
use crate::observability::metrics;
use crate::proxy::fetcher::{Decoding, OriginFetcher};
use crate::proxy::types::{BodyStream, FetchError, ResourceRequest};

/// Where the body of a new entry comes from.
#[derive(Debug, Clone)]
pub enum BodySource {
    /// The complete, uncompressed body is already in memory.
    Buffered(Bytes),
    /// Fetch the resource again with decompression enabled.
    Refetch(ResourceRequest),
}

impl BodySource {
    pub fn mode(&self) -> &'static str {
        match self {
            BodySource::Buffered(_) => "buffered",
            BodySource::Refetch(_) => "refetch",
        }
    }
}

/// Errors raised while persisting an entry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot encode entry: {0}")]
    Entry(#[from] EntryError),

    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("re-fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("re-fetch stream failed: {0}")]
    Stream(#[source] reqwest::Error),

    #[error("re-fetched body is still encoded as '{0}'")]
    StillEncoded(String),
}

/// On-disk cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    fetcher: OriginFetcher,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, fetcher: OriginFetcher) -> Self {
        Self {
            dir: dir.into(),
            fetcher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory if needed.
    pub fn prepare(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// File holding the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.to_hex())
    }

    /// Open the entry for `key`, reading only its header.
    ///
    /// Missing, unreadable, and malformed files all come back as `None`.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        match open_entry(&path).await {
            Ok(entry) => {
                tracing::debug!(key = %key, content_type = ?entry.content_type, size = entry.body_len, "Cache hit");
                metrics::record_cache_lookup("hit");
                Some(entry)
            }
            Err(CacheError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                metrics::record_cache_lookup("miss");
                None
            }
            Err(CacheError::Entry(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                metrics::record_cache_lookup("corrupt");
                None
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read cache entry");
                metrics::record_cache_lookup("unreadable");
                None
            }
        }
    }

    /// Persist an entry, returning the final path.
    ///
    /// Nothing is written when the content type does not fit the header,
    /// the re-fetch fails before any byte arrives, or the re-fetched body
    /// keeps a content coding the client could not decode.
    pub async fn store(
        &self,
        key: &CacheKey,
        content_type: &str,
        source: BodySource,
    ) -> Result<PathBuf, CacheError> {
        let field = encode_header(content_type)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));

        let written = match source {
            BodySource::Buffered(body) => write_entry(&tmp, &field, EntryBody::Buffered(body)).await,
            BodySource::Refetch(request) => {
                let origin = self.fetcher.fetch(&request, Decoding::Decompress).await?;
                // The client only strips Content-Encoding for codings it decoded.
                if !origin.is_identity_encoded() {
                    let coding = origin
                        .headers()
                        .get(header::CONTENT_ENCODING)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown")
                        .to_string();
                    return Err(CacheError::StillEncoded(coding));
                }
                write_entry(&tmp, &field, EntryBody::Stream(origin.into_body_stream())).await
            }
        };

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::info!(key = %key, path = %path.display(), content_type, "Cache entry created");
        Ok(path)
    }

    /// Persist on a detached task; failures are logged and dropped.
    pub fn store_in_background(&self, key: CacheKey, content_type: String, source: BodySource) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(key = %key, "No runtime available, skipping cache persistence");
                return;
            }
        };

        let store = self.clone();
        handle.spawn(async move {
            let mode = source.mode();
            match store.store(&key, &content_type, source).await {
                Ok(_) => metrics::record_persist(mode, "ok"),
                Err(e @ (CacheError::Entry(_) | CacheError::StillEncoded(_))) => {
                    tracing::debug!(key = %key, error = %e, "Response not cacheable");
                    metrics::record_persist(mode, "skipped");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to persist cache entry");
                    metrics::record_persist(mode, "failed");
                }
            }
        });
    }
}

async fn open_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let mut file = fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    if len < HEADER_LENGTH as u64 {
        return Err(EntryError::Truncated(len as usize).into());
    }
    let mut field = [0u8; HEADER_LENGTH];
    file.read_exact(&mut field).await?;
    let content_type = decode_header(&field)?;

    Ok(CacheEntry::new(content_type, len - HEADER_LENGTH as u64, file))
}

enum EntryBody {
    Buffered(Bytes),
    Stream(BodyStream),
}

async fn write_entry(
    path: &Path,
    field: &[u8; HEADER_LENGTH],
    body: EntryBody,
) -> Result<(), CacheError> {
    let file = fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);
    writer.write_all(field).await?;

    match body {
        EntryBody::Buffered(bytes) => writer.write_all(&bytes).await?,
        EntryBody::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(CacheError::Stream)?;
                writer.write_all(&chunk).await?;
            }
        }
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(())
}
