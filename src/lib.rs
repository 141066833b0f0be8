//! A blocking Server-Sent Events (SSE) client built on `reqwest`.
//!
//! [`EventSource`] issues a long-lived HTTP request, incrementally
//! parses the line-oriented event stream from the response body, and
//! reconnects automatically with exponential, server-directable backoff.
//!
//! ```no_run
//! use reqwest_sse::EventSource;
//!
//! # fn main() -> Result<(), reqwest_sse::EventSourceError> {
//! let mut source = EventSource::builder("https://example.com/stream").build()?;
//! source.open()?;
//! for event in &mut source {
//!     let event = event?;
//!     println!("{}: {}", event.event_type, event.data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod parser;

pub use client::{
    EventSource, EventSourceBuilder, DEFAULT_MAX_CONNECT_RETRY, DEFAULT_RECONNECTION_TIME,
};
pub use error::EventSourceError;
pub use event::{MessageEvent, ReadyState};
