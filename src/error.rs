//! Error types for event stream connections.

use thiserror::Error;

/// Errors surfaced by [`EventSource`](crate::EventSource).
///
/// Transport failures within the connect retry budget are absorbed and
/// retried with backoff; everything else surfaces through this enum.
#[derive(Debug, Error)]
pub enum EventSourceError {
    /// The server answered with a status other than 200.
    #[error("event stream request returned status {status}")]
    InvalidStatusCode {
        /// The numeric HTTP status received.
        status: u16,
    },

    /// The server answered 200 but not with `text/event-stream`.
    #[error("event stream has wrong content type: {}", .content_type.as_deref().unwrap_or("<missing>"))]
    InvalidContentType {
        /// The received `Content-Type`, or `None` if the header was absent.
        content_type: Option<String>,
    },

    /// Transport-level failure: DNS, connect, timeout or read errors.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The stream URL could not be parsed at build time.
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),

    /// The stream was iterated before any successful `connect`.
    #[error("event stream is not connected")]
    NotConnected,
}
