//! Connection manager for a single event stream subscription.
//!
//! [`EventSource`] owns the HTTP request lifecycle: it issues the
//! streaming request, validates the response, feeds body lines into the
//! parser, and reconnects with exponential backoff when the stream
//! breaks. The model is synchronous and blocking: iteration blocks on
//! network reads and on backoff sleeps.

use std::fmt;
use std::io::{BufRead, BufReader};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};

use crate::error::EventSourceError;
use crate::event::{MessageEvent, ReadyState};
use crate::parser::EventStreamParser;

/// Wait before the first reconnect attempt, unless overridden by the
/// builder or a server `retry:` directive.
pub const DEFAULT_RECONNECTION_TIME: Duration = Duration::from_secs(5);

/// Connect retry budget used by [`EventSource::open`].
pub const DEFAULT_MAX_CONNECT_RETRY: u32 = 5;

const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";
const CONTENT_TYPE_EVENT_STREAM_UTF8: &str = "text/event-stream;charset=utf-8";
const LAST_EVENT_ID: &str = "Last-Event-Id";

type OpenHandler = Box<dyn FnMut() + Send>;
type MessageHandler = Box<dyn FnMut(&MessageEvent) + Send>;
type ErrorHandler = Box<dyn FnMut() + Send>;

/// Builder for [`EventSource`].
///
/// ```no_run
/// use std::time::Duration;
/// use reqwest_sse::EventSource;
///
/// # fn main() -> Result<(), reqwest_sse::EventSourceError> {
/// let mut source = EventSource::builder("https://example.com/stream")
///     .reconnection_time(Duration::from_secs(2))
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// source.open()?;
/// for event in &mut source {
///     println!("{:?}", event?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct EventSourceBuilder {
    url: String,
    method: Method,
    reconnection_time: Duration,
    max_connect_retry: u32,
    stream_retry: Option<u32>,
    timeout: Option<Duration>,
    headers: HeaderMap,
    client: Option<Client>,
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
}

impl EventSourceBuilder {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: Method::GET,
            reconnection_time: DEFAULT_RECONNECTION_TIME,
            max_connect_retry: DEFAULT_MAX_CONNECT_RETRY,
            stream_retry: None,
            timeout: None,
            headers: HeaderMap::new(),
            client: None,
            on_open: None,
            on_message: None,
            on_error: None,
        }
    }

    /// HTTP method for the stream request. Defaults to GET.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Initial wait before reconnecting after a failure. The delay
    /// doubles on every consecutive failure and resets on a successful
    /// connect. Must be positive.
    pub fn reconnection_time(mut self, reconnection_time: Duration) -> Self {
        self.reconnection_time = reconnection_time;
        self
    }

    /// Retry budget used by [`EventSource::open`], and the default budget
    /// for reconnects after a broken stream.
    pub fn max_connect_retry(mut self, max_connect_retry: u32) -> Self {
        self.max_connect_retry = max_connect_retry;
        self
    }

    /// Retry budget for reconnects after a broken stream, when it should
    /// differ from `max_connect_retry`. Each broken-stream episode gets
    /// this budget afresh.
    pub fn stream_retry(mut self, stream_retry: u32) -> Self {
        self.stream_retry = Some(stream_retry);
        self
    }

    /// Timeout for establishing the connection. Reading the stream is
    /// never time-limited; an event stream body does not end.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add one request header. `Accept` and `Cache-Control` are set by
    /// the client and take precedence.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Merge a prebuilt header map into the request headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Use a caller-built `reqwest` client instead of constructing one.
    /// The caller's timeout configuration then applies as-is and
    /// [`timeout`](Self::timeout) is ignored.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Handler invoked on every transition into the OPEN state.
    pub fn on_open<F>(mut self, handler: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_open = Some(Box::new(handler));
        self
    }

    /// Handler invoked for every dispatched event whose type is
    /// `"message"`.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&MessageEvent) + Send + 'static,
    {
        self.on_message = Some(Box::new(handler));
        self
    }

    /// Handler invoked whenever the connection fails or the stream
    /// breaks, before any reconnection attempt.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Validate the URL and assemble the source. The connection is not
    /// opened yet; call [`EventSource::open`] or
    /// [`EventSource::connect`].
    pub fn build(self) -> Result<EventSource, EventSourceError> {
        let url = Url::parse(&self.url)
            .map_err(|err| EventSourceError::InvalidUrl(err.to_string()))?;

        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = Client::builder().timeout(None);
                if let Some(timeout) = self.timeout {
                    builder = builder.connect_timeout(timeout);
                }
                builder.build()?
            }
        };

        let mut headers = self.headers;
        headers.insert(ACCEPT, HeaderValue::from_static(CONTENT_TYPE_EVENT_STREAM));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok(EventSource {
            url,
            method: self.method,
            client,
            headers,
            ready_state: ReadyState::Connecting,
            reconnection_time: self.reconnection_time,
            original_reconnection_time: self.reconnection_time,
            max_connect_retry: self.max_connect_retry,
            stream_retry: self.stream_retry,
            parser: EventStreamParser::new(),
            reader: None,
            on_open: self.on_open,
            on_message: self.on_message,
            on_error: self.on_error,
        })
    }
}

/// One logical subscription to a remote event stream.
///
/// Connect once, then iterate: each iteration blocks until the server
/// dispatches the next event, transparently reconnecting with
/// exponential backoff when the stream breaks. Dropping the source
/// closes the connection and releases the owned HTTP session.
pub struct EventSource {
    url: Url,
    method: Method,
    client: Client,
    headers: HeaderMap,
    ready_state: ReadyState,
    reconnection_time: Duration,
    original_reconnection_time: Duration,
    max_connect_retry: u32,
    stream_retry: Option<u32>,
    parser: EventStreamParser,
    reader: Option<BufReader<Response>>,
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
}

impl EventSource {
    /// Start building a source for the given URL.
    pub fn builder(url: &str) -> EventSourceBuilder {
        EventSourceBuilder::new(url)
    }

    /// The URL this source connects to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Current readiness of the connection.
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// The identifier that will be sent as `Last-Event-Id` on the next
    /// connect, empty if the server never sent one.
    pub fn last_event_id(&self) -> &str {
        self.parser.last_event_id()
    }

    /// Connect with the configured `max_connect_retry` budget.
    pub fn open(&mut self) -> Result<(), EventSourceError> {
        self.connect(self.max_connect_retry)
    }

    /// Issue the streaming request, retrying transport failures up to
    /// `retry` times with exponential backoff.
    ///
    /// A response with the wrong status or content type fails
    /// immediately without consuming the retry budget.
    pub fn connect(&mut self, retry: u32) -> Result<(), EventSourceError> {
        let mut budget = retry;
        loop {
            tracing::debug!(budget, url = %self.url, "connecting to event stream");

            let result = self
                .client
                .request(self.method.clone(), self.url.clone())
                .headers(self.request_headers())
                .send();

            let err = match result {
                Ok(response) => return self.validate_response(response),
                Err(err) => err,
            };

            if budget == 0 || self.ready_state == ReadyState::Closed {
                self.fail_connect();
                return Err(err.into());
            }

            self.ready_state = ReadyState::Connecting;
            self.notify_error();
            self.reconnection_time *= 2;
            tracing::debug!(
                wait = ?self.reconnection_time,
                error = %err,
                "request failed, waiting before retry"
            );
            thread::sleep(self.reconnection_time);
            budget -= 1;
        }
    }

    /// Close the connection and drop the response, releasing the
    /// transport resource. Idempotent; a closed source never reconnects.
    pub fn close(&mut self) {
        tracing::debug!(url = %self.url, "closing event stream");
        self.ready_state = ReadyState::Closed;
        self.reader = None;
    }

    /// Block until the next event is dispatched, transparently
    /// reconnecting when the stream ends or a read fails.
    ///
    /// Fails with [`EventSourceError::NotConnected`] before the first
    /// successful connect, and with the underlying connect error once a
    /// reconnect becomes unrecoverable.
    pub fn next_event(&mut self) -> Result<MessageEvent, EventSourceError> {
        if self.reader.is_none() {
            return Err(EventSourceError::NotConnected);
        }

        loop {
            loop {
                let line = match self.read_line() {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "event stream read failed");
                        break;
                    }
                };

                let event = self.parser.feed_line(&line);
                if let Some(delay) = self.parser.take_retry_update() {
                    tracing::debug!(?delay, "server directed reconnection time");
                    self.reconnection_time = delay;
                }
                if let Some(event) = event {
                    if event.event_type == "message" {
                        if let Some(handler) = self.on_message.as_mut() {
                            handler(&event);
                        }
                    }
                    return Ok(event);
                }
            }

            // The stream ended or a read failed: drop the partial event
            // and reconnect with a fresh budget.
            self.parser.clear();
            self.ready_state = ReadyState::Connecting;
            self.notify_error();
            self.reconnection_time *= 2;
            tracing::debug!(
                wait = ?self.reconnection_time,
                "stream ended, waiting before reconnect"
            );
            thread::sleep(self.reconnection_time);
            self.connect(self.stream_retry.unwrap_or(self.max_connect_retry))?;
        }
    }

    /// Headers for the next request: the configured map plus
    /// `Last-Event-Id` when an identifier has been committed.
    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        let last_event_id = self.parser.last_event_id();
        if !last_event_id.is_empty() {
            match HeaderValue::from_str(last_event_id) {
                Ok(value) => {
                    headers.insert(LAST_EVENT_ID, value);
                }
                Err(_) => {
                    tracing::warn!(
                        last_event_id,
                        "last event id is not a valid header value, not sending it"
                    );
                }
            }
        }
        headers
    }

    fn validate_response(&mut self, response: Response) -> Result<(), EventSourceError> {
        let status = response.status();
        if status != StatusCode::OK {
            tracing::error!(
                status = status.as_u16(),
                url = %self.url,
                "event stream request rejected"
            );
            self.fail_connect();
            return Err(EventSourceError::InvalidStatusCode {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if !content_type.as_deref().is_some_and(is_event_stream) {
            tracing::error!(
                content_type = content_type.as_deref().unwrap_or("<missing>"),
                url = %self.url,
                "event stream has wrong content type"
            );
            self.fail_connect();
            return Err(EventSourceError::InvalidContentType { content_type });
        }

        self.mark_open();
        self.parser.set_origin(origin_of(response.url()));
        self.reader = Some(BufReader::new(response));
        Ok(())
    }

    /// Transition into OPEN and reset the backoff, unless a close raced
    /// the connect.
    fn mark_open(&mut self) {
        if self.ready_state != ReadyState::Closed {
            self.ready_state = ReadyState::Open;
            if let Some(handler) = self.on_open.as_mut() {
                handler();
            }
        }
        self.reconnection_time = self.original_reconnection_time;
    }

    fn fail_connect(&mut self) {
        if self.ready_state != ReadyState::Closed {
            self.ready_state = ReadyState::Closed;
            self.notify_error();
        }
    }

    fn notify_error(&mut self) {
        if let Some(handler) = self.on_error.as_mut() {
            handler();
        }
    }

    /// Read the next logical line from the response body, stripping the
    /// trailing LF and optional CR. `Ok(None)` at end of stream.
    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

impl Iterator for EventSource {
    type Item = Result<MessageEvent, EventSourceError>;

    /// Yields events until the source is closed; an unrecoverable
    /// failure is yielded as a final `Err` item, after which the
    /// iterator is exhausted.
    fn next(&mut self) -> Option<Self::Item> {
        if self.ready_state == ReadyState::Closed {
            return None;
        }
        Some(self.next_event())
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.url.as_str())
            .field("ready_state", &self.ready_state)
            .field("reconnection_time", &self.reconnection_time)
            .finish_non_exhaustive()
    }
}

/// Accept `text/event-stream`, optionally with a utf-8 charset.
/// Comparison is case-insensitive with spaces ignored.
fn is_event_stream(content_type: &str) -> bool {
    let normalized: String = content_type
        .chars()
        .filter(|c| *c != ' ')
        .collect::<String>()
        .to_ascii_lowercase();
    normalized == CONTENT_TYPE_EVENT_STREAM || normalized == CONTENT_TYPE_EVENT_STREAM_UTF8
}

/// `scheme://host[:port]` of the URL that delivered the response.
/// Scheme-default ports are omitted.
fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let source = EventSource::builder("http://example.com/stream")
            .build()
            .unwrap();

        assert_eq!(source.ready_state(), ReadyState::Connecting);
        assert_eq!(source.url().as_str(), "http://example.com/stream");
        assert_eq!(source.last_event_id(), "");
        assert_eq!(source.method, Method::GET);
        assert_eq!(source.reconnection_time, DEFAULT_RECONNECTION_TIME);
        assert_eq!(source.max_connect_retry, DEFAULT_MAX_CONNECT_RETRY);
    }

    #[test]
    fn builder_overrides_are_kept() {
        let source = EventSource::builder("http://example.com/stream")
            .method(Method::POST)
            .reconnection_time(Duration::from_millis(250))
            .max_connect_retry(2)
            .stream_retry(0)
            .build()
            .unwrap();

        assert_eq!(source.method, Method::POST);
        assert_eq!(source.reconnection_time, Duration::from_millis(250));
        assert_eq!(source.original_reconnection_time, Duration::from_millis(250));
        assert_eq!(source.max_connect_retry, 2);
        assert_eq!(source.stream_retry, Some(0));
    }

    #[test]
    fn builder_rejects_invalid_url() {
        let result = EventSource::builder("not a url").build();
        assert!(matches!(result, Err(EventSourceError::InvalidUrl(_))));
    }

    #[test]
    fn builder_injects_default_headers() {
        let source = EventSource::builder("http://example.com/stream")
            .header(
                HeaderName::from_static("x-api-key"),
                HeaderValue::from_static("secret"),
            )
            .build()
            .unwrap();

        let headers = source.request_headers();
        assert_eq!(headers.get(ACCEPT).unwrap(), "text/event-stream");
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
        assert!(headers.get(LAST_EVENT_ID).is_none());
    }

    #[test]
    fn last_event_id_header_sent_once_committed() {
        let mut source = EventSource::builder("http://example.com/stream")
            .build()
            .unwrap();

        source.parser.feed_line("id: 42");
        source.parser.feed_line("");

        let headers = source.request_headers();
        assert_eq!(headers.get(LAST_EVENT_ID).unwrap(), "42");
    }

    #[test]
    fn next_event_before_connect_is_misuse() {
        let mut source = EventSource::builder("http://example.com/stream")
            .build()
            .unwrap();

        assert!(matches!(
            source.next_event(),
            Err(EventSourceError::NotConnected)
        ));
        assert!(matches!(
            source.next(),
            Some(Err(EventSourceError::NotConnected))
        ));
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let mut source = EventSource::builder("http://example.com/stream")
            .build()
            .unwrap();

        source.close();
        assert_eq!(source.ready_state(), ReadyState::Closed);
        source.close();
        assert_eq!(source.ready_state(), ReadyState::Closed);

        // A closed source is an exhausted iterator.
        assert!(source.next().is_none());
    }

    #[test]
    fn accepts_event_stream_content_types() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("text/event-stream;charset=utf-8"));
        assert!(is_event_stream("text/event-stream; charset=utf-8"));
        assert!(is_event_stream("Text/Event-Stream; Charset=UTF-8"));
    }

    #[test]
    fn rejects_other_content_types() {
        assert!(!is_event_stream("application/json"));
        assert!(!is_event_stream("text/plain"));
        assert!(!is_event_stream(""));
        assert!(!is_event_stream("text/event-stream2"));
    }

    #[test]
    fn origin_omits_default_port() {
        let url = Url::parse("https://stream.example.com/feed?x=1").unwrap();
        assert_eq!(origin_of(&url), "https://stream.example.com");
    }

    #[test]
    fn origin_keeps_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080/feed").unwrap();
        assert_eq!(origin_of(&url), "http://127.0.0.1:8080");
    }
}
