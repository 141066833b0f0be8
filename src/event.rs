//! Value types delivered to event stream consumers.

/// Connection readiness.
///
/// The state is monotonic within one connect/stream/close cycle:
/// `Connecting` → `Open` → `Closed`, or `Connecting` → `Closed` when the
/// connect fails. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Not yet connected, or waiting to reconnect after a broken stream.
    Connecting,
    /// A validated response is being streamed.
    Open,
    /// Closed deliberately or after an unrecoverable failure.
    Closed,
}

/// A fully assembled server-sent event.
///
/// Produced only at blank-line dispatch boundaries; events that carry no
/// `data:` field are never dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// The event type, `"message"` unless the server named one with an
    /// `event:` field.
    pub event_type: String,
    /// The accumulated `data:` payload; multiple fragments join with `\n`.
    pub data: String,
    /// `scheme://host[:port]` of the connection that delivered the event.
    pub origin: String,
    /// The identifier committed by the most recent `id:` field, empty if
    /// the server never sent one.
    pub last_event_id: String,
}
