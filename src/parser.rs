//! Incremental parser for the SSE wire format.
//!
//! The stream is line oriented: `event:`, `data:`, `id:` and `retry:`
//! fields accumulate into an event in progress, an empty line dispatches
//! it, and lines starting with `:` are comments. The parser never fails:
//! malformed input is ignored or recovered field by field.

use std::time::Duration;

use crate::event::MessageEvent;

/// Event type used when the server does not name one.
const DEFAULT_EVENT_TYPE: &str = "message";

/// `id:` values that are ignored, so a stray NUL from the server cannot
/// poison the `Last-Event-Id` header.
const NUL_ID_SENTINELS: [&str; 2] = ["\u{0}", "\u{0}\u{0}"];

/// Classification of a single raw line from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Empty line, dispatches the event in progress.
    Empty,
    /// Comment line (starts with `:`), ignored.
    Comment,
    /// A `name: value` field. A line with no colon is a field whose name
    /// is the whole line and whose value is empty.
    Field {
        name: &'a str,
        value: &'a str,
    },
}

/// Split one raw line into its SSE meaning.
///
/// Fields split on the first colon; the value keeps everything after it,
/// minus at most one leading space.
pub fn parse_line(line: &str) -> SseLine<'_> {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if line.starts_with(':') {
        return SseLine::Comment;
    }

    match line.split_once(':') {
        Some((name, value)) => SseLine::Field {
            name,
            value: value.strip_prefix(' ').unwrap_or(value),
        },
        None => SseLine::Field {
            name: line,
            value: "",
        },
    }
}

/// Stateful parser that accumulates field lines and emits a complete
/// [`MessageEvent`] at each empty-line boundary.
///
/// The committed last-event-id and the origin outlive individual events;
/// the event-in-progress state is cleared at every dispatch and whenever
/// the stream breaks.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    /// Event type in progress, unset until an `event:` or `data:` field
    /// is seen.
    event_type: Option<String>,
    /// Data buffer in progress; each fragment is newline terminated so
    /// multiple `data:` lines join with `\n`.
    data: Option<String>,
    /// Most recently read `id:` value, committed at the next dispatch.
    event_id: String,
    /// Identifier committed at the last dispatch, sent back to the server
    /// on reconnect.
    last_event_id: String,
    /// Origin of the connection feeding the parser, stamped on every
    /// dispatched event.
    origin: String,
    /// Reconnection delay requested by a `retry:` field, waiting to be
    /// consumed by the connection manager.
    retry_update: Option<Duration>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the origin of the connection now feeding the parser.
    pub fn set_origin(&mut self, origin: String) {
        self.origin = origin;
    }

    /// The identifier to send as `Last-Event-Id` on the next connect.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Take the server-directed reconnection delay, if a `retry:` field
    /// was seen since the last call.
    pub fn take_retry_update(&mut self) -> Option<Duration> {
        self.retry_update.take()
    }

    /// Feed one line to the parser.
    ///
    /// Returns a complete event when the line was an empty-line dispatch
    /// boundary and the event in progress carried data.
    pub fn feed_line(&mut self, line: &str) -> Option<MessageEvent> {
        match parse_line(line) {
            SseLine::Empty => self.dispatch(),
            SseLine::Comment => None,
            SseLine::Field { name, value } => {
                self.process_field(name, value);
                None
            }
        }
    }

    /// Drop the event in progress, keeping the committed last-event-id.
    ///
    /// Called when the stream breaks so a partial event never leaks into
    /// the next connection.
    pub fn clear(&mut self) {
        self.event_type = None;
        self.data = None;
    }

    fn process_field(&mut self, name: &str, value: &str) {
        match name {
            "event" => {
                self.event_type = Some(value.to_string());
            }
            "data" => {
                if self.event_type.is_none() {
                    self.event_type = Some(DEFAULT_EVENT_TYPE.to_string());
                }
                let data = self.data.get_or_insert_with(String::new);
                data.push_str(value);
                data.push('\n');
            }
            "id" => {
                if !NUL_ID_SENTINELS.contains(&value) {
                    self.event_id = value.to_string();
                }
            }
            "retry" => match value.parse::<u64>() {
                Ok(millis) => {
                    self.retry_update = Some(Duration::from_millis(millis));
                }
                Err(_) => {
                    tracing::warn!(value, "ignoring invalid retry field");
                }
            },
            // Unknown fields are ignored per the wire format.
            _ => {}
        }
    }

    /// Empty-line boundary: commit the id, then emit the event in
    /// progress if it carries data.
    fn dispatch(&mut self) -> Option<MessageEvent> {
        self.last_event_id = self.event_id.clone();

        let Some(mut data) = self.data.take() else {
            self.event_type = None;
            return None;
        };

        // Every fragment is newline terminated; the last one is not part
        // of the payload.
        if data.ends_with('\n') {
            data.pop();
        }

        let event = MessageEvent {
            event_type: self
                .event_type
                .take()
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data,
            origin: self.origin.clone(),
            last_event_id: self.last_event_id.clone(),
        };
        tracing::debug!(event_type = %event.event_type, "dispatching event");
        Some(event)
    }
}
