//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use rcproxy::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
    head_request: bool,
    declared_length: Option<usize>,
    default_content_type: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            head_request: false,
            declared_length: None,
            default_content_type: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place, for callers that build a response from
    /// another header map.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes. Passing a [`Bytes`] handle does
    /// not copy the payload.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Marks this as the answer to a `HEAD` request: the head is written as
    /// for `GET`, including `Content-Length`, but the body bytes are not.
    #[must_use]
    pub fn head_request(mut self, head_request: bool) -> Self {
        self.head_request = head_request;
        self
    }

    /// Overrides the `Content-Length` written for a `HEAD` answer.
    ///
    /// A relayed `HEAD` response carries no body, only the length the origin
    /// reported. Ignored unless [`head_request`](Self::head_request) is set.
    #[must_use]
    pub fn declared_length(mut self, length: usize) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Controls whether [`into_bytes`](Self::into_bytes) adds a
    /// `text/plain` `Content-Type` to a non-empty body that has none.
    ///
    /// Relayed responses turn this off so callers see exactly the headers
    /// the upstream sent.
    #[must_use]
    pub fn default_content_type(mut self, enabled: bool) -> Self {
        self.default_content_type = enabled;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers set on this response so far (before serialization
    /// adds `Content-Type`, `Connection` and `Content-Length`).
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body.
    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty, no
    ///   `Content-Type` header was set, and the default is enabled.
    /// - `Connection: keep-alive` or `Connection: close`.
    /// - `Content-Length: <n>`, unless the status forbids a body.
    ///
    /// Framing headers already present in the map are dropped; this method is
    /// the only source of `Content-Length` and `Connection`. Header values are
    /// written byte for byte. Answers to `HEAD` end after the blank line.
    pub fn into_bytes(mut self) -> BytesMut {
        if self.status.forbids_body() {
            self.body = Bytes::new();
        }
        let content_length = match self.declared_length {
            Some(length) if self.head_request => length,
            _ => self.body.len(),
        };

        if self.default_content_type
            && !self.body.is_empty()
            && !self.headers.contains("content-type")
        {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };

        let estimated_size = 128 + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        for (name, value) in self.headers.end_to_end() {
            buf.put(name.as_bytes());
            buf.put(&b": "[..]);
            buf.put(value);
            buf.put(&b"\r\n"[..]);
        }
        buf.put(format!("Connection: {connection}\r\n").as_bytes());

        // Content-Length is always the last header before the blank line
        if !self.status.forbids_body() {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        if !self.head_request && !self.body.is_empty() {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
