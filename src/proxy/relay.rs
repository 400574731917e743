//! Streaming relay of origin responses to the client.
//!
//! The body is never buffered by the relay itself: every chunk read from the
//! origin is handed to the server as soon as it arrives. An optional
//! [`RelayObserver`] sees the same chunks on their way through and is told how
//! the transfer ended, which is how persistence hooks into a single pass.

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::http::response::copy_end_to_end_headers;
use crate::proxy::types::OriginResponse;

/// How a relayed body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The origin stream ended and every chunk was handed to the client.
    Complete,
    /// The origin stream failed mid-transfer.
    OriginFailed,
    /// The client went away before the body finished.
    ClientGone,
}

/// Receives relayed chunks and the final outcome.
pub trait RelayObserver: Send + 'static {
    fn on_chunk(&mut self, chunk: &Bytes);

    /// Called exactly once.
    fn on_finish(self: Box<Self>, outcome: RelayOutcome);
}

/// Copies an origin response onto a client response.
#[derive(Debug, Clone)]
pub struct ResponseRelay {
    cache_control: HeaderValue,
}

impl ResponseRelay {
    /// `cache_control` is added when the origin sent none.
    pub fn new(cache_control: HeaderValue) -> Self {
        Self { cache_control }
    }

    /// Build the client response: status, reason, end-to-end headers, then a
    /// body that streams straight from the origin.
    pub fn relay(
        &self,
        origin: OriginResponse,
        observer: Option<Box<dyn RelayObserver>>,
    ) -> Response {
        let status = origin.status();
        let reason = origin.reason().cloned();
        let mut headers = axum::http::HeaderMap::with_capacity(origin.headers().len() + 1);
        copy_end_to_end_headers(origin.headers(), &mut headers);
        if !headers.contains_key(header::CACHE_CONTROL) {
            headers.insert(header::CACHE_CONTROL, self.cache_control.clone());
        }

        let expected_len = origin.content_length();
        let stream = RelayStream::new(origin.into_body_stream(), expected_len, observer);
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        if let Some(reason) = reason {
            response.extensions_mut().insert(reason);
        }
        response
    }
}

/// Origin body stream that reports its progress to an observer.
///
/// With a known length the transfer counts as complete once that many bytes
/// went through: the server drops a length-delimited body as soon as the
/// last byte is written, without polling it to the end.
pub struct RelayStream<S> {
    inner: S,
    expected_len: Option<u64>,
    relayed: u64,
    observer: Option<Box<dyn RelayObserver>>,
}

impl<S> RelayStream<S> {
    pub fn new(inner: S, expected_len: Option<u64>, observer: Option<Box<dyn RelayObserver>>) -> Self {
        Self {
            inner,
            expected_len,
            relayed: 0,
            observer,
        }
    }

    fn finish(&mut self, outcome: RelayOutcome) {
        if let Some(observer) = self.observer.take() {
            observer.on_finish(outcome);
        }
    }
}

impl<S, E> Stream for RelayStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.relayed += chunk.len() as u64;
                if let Some(observer) = this.observer.as_mut() {
                    observer.on_chunk(&chunk);
                }
                if this.expected_len == Some(this.relayed) {
                    this.finish(RelayOutcome::Complete);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Origin stream failed mid-transfer");
                this.finish(RelayOutcome::OriginFailed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(RelayOutcome::Complete);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for RelayStream<S> {
    fn drop(&mut self) {
        if self.observer.is_some() {
            tracing::debug!("Client went away before the relay finished");
            self.finish(RelayOutcome::ClientGone);
        }
    }
}
