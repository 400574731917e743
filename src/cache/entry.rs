//! On-disk entry encoding.
//!
//! ```text
//! offset 0..15   : content-type, ASCII, space-padded to 16 bytes
//! offset 16..EOF : raw body bytes, uncompressed
//! ```

use axum::http::HeaderValue;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Width of the content-type field at the head of every entry.
pub const HEADER_LENGTH: usize = 16;

/// Content type assumed when the origin sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Reasons an entry cannot be encoded or decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry is {0} bytes, shorter than the 16-byte header")]
    Truncated(usize),

    #[error("content-type field is not valid text")]
    NotText,

    #[error("content-type field '{0}' is not a media type")]
    NotMimeType(String),

    #[error("content type '{0}' does not fit in 16 bytes")]
    ContentTypeTooLong(String),

    #[error("content type '{0}' is not a valid header value")]
    InvalidContentType(String),
}

/// An entry opened for reading. The body stays on disk until streamed.
#[derive(Debug)]
pub struct CacheEntry {
    pub content_type: HeaderValue,
    /// Body size in bytes, excluding the header.
    pub body_len: u64,
    /// Positioned at the first body byte.
    file: File,
}

impl CacheEntry {
    pub(crate) fn new(content_type: HeaderValue, body_len: u64, file: File) -> Self {
        Self {
            content_type,
            body_len,
            file,
        }
    }

    /// Stream the body in fixed-size reads.
    pub fn into_body_stream(self) -> ReaderStream<File> {
        ReaderStream::new(self.file)
    }
}

/// Parse the content-type field at the head of an entry file.
///
/// `field` is whatever was read from the start of the file; anything shorter
/// than [`HEADER_LENGTH`] is a truncated entry.
pub fn decode_header(field: &[u8]) -> Result<HeaderValue, EntryError> {
    if field.len() < HEADER_LENGTH {
        return Err(EntryError::Truncated(field.len()));
    }

    let field = std::str::from_utf8(&field[..HEADER_LENGTH]).map_err(|_| EntryError::NotText)?;
    let content_type = field.trim_end();
    if !content_type.contains('/') {
        return Err(EntryError::NotMimeType(content_type.to_string()));
    }
    HeaderValue::from_str(content_type).map_err(|_| EntryError::InvalidContentType(content_type.to_string()))
}

/// Reduce a Content-Type header to its media type, dropping parameters.
///
/// `text/html; charset=utf-8` becomes `text/html`. A missing or blank value
/// maps to [`DEFAULT_CONTENT_TYPE`].
pub fn media_type(header: Option<&HeaderValue>) -> String {
    header
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Build the fixed-width content-type field.
///
/// Values that would not decode back to themselves are rejected instead of
/// being truncated: longer than the field, non-printable, or lacking `/`.
pub fn encode_header(content_type: &str) -> Result<[u8; HEADER_LENGTH], EntryError> {
    if content_type.len() > HEADER_LENGTH {
        return Err(EntryError::ContentTypeTooLong(content_type.to_string()));
    }
    if content_type.is_empty()
        || !content_type.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
        || content_type.ends_with(' ')
    {
        return Err(EntryError::InvalidContentType(content_type.to_string()));
    }
    if !content_type.contains('/') {
        return Err(EntryError::NotMimeType(content_type.to_string()));
    }

    let mut header = [b' '; HEADER_LENGTH];
    header[..content_type.len()].copy_from_slice(content_type.as_bytes());
    Ok(header)
}
