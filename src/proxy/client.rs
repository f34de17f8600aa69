//! Upstream HTTP client.
//!
//! The proxy handler is generic over [`UpstreamClient`] so the transport can be
//! swapped (the tests use in-memory clients). [`HttpClient`] is the real one:
//! HTTP/1.1 over a fresh TCP connection per exchange, response heads parsed
//! with [`httparse`].
//!
//! Sending and reading the body are separate steps. [`UpstreamClient::send`]
//! resolves once the response head has arrived; the body is drained later with
//! [`ResponseBody::collect`], so the handler can tell a failed exchange from a
//! failed body read.

use std::future::Future;
use std::io;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::outbound::OutboundRequest;
use crate::http::{Headers, Method, StatusCode, body::BodyError, body::ChunkedDecoder};

/// Errors produced by the upstream exchange.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed upstream response: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("upstream response head exceeds {max_bytes} bytes")]
    HeadTooLarge { max_bytes: usize },

    #[error("upstream sent invalid status code {code}")]
    InvalidStatus { code: u16 },

    #[error("upstream sent invalid Content-Length {value:?}")]
    InvalidContentLength { value: String },

    #[error("upstream closed the connection before the response was complete")]
    ConnectionClosed,

    #[error("malformed chunked body: {0}")]
    Chunked(#[from] BodyError),
}

/// The head of an upstream response plus a body that has not been read yet.
#[derive(Debug)]
pub struct UpstreamResponse<B> {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: B,
}

/// A response body that can be drained into memory exactly once.
pub trait ResponseBody: Send {
    /// Reads the whole body.
    fn collect(self) -> impl Future<Output = Result<Bytes, ClientError>> + Send;
}

impl ResponseBody for Bytes {
    async fn collect(self) -> Result<Bytes, ClientError> {
        Ok(self)
    }
}

/// Performs one request/response exchange with the upstream.
pub trait UpstreamClient: Send + Sync + 'static {
    type Body: ResponseBody;

    /// Sends `request` and waits for the response head.
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<UpstreamResponse<Self::Body>, ClientError>> + Send;
}

/// Maximum number of headers accepted on an upstream response.
const MAX_RESPONSE_HEADERS: usize = 100;

/// Maximum size of an upstream response head (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Read buffer growth step.
const READ_CHUNK: usize = 8 * 1024;

/// HTTP/1.1 client that opens one TCP connection per exchange.
///
/// Requests are sent with `Connection: close`; there is no pooling and no
/// timeout, so a silent upstream keeps the calling task suspended.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClient;

impl HttpClient {
    pub fn new() -> Self {
        Self
    }
}

impl UpstreamClient for HttpClient {
    type Body = HttpBody;

    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse<HttpBody>, ClientError> {
        let authority = request.upstream().socket_addr();
        let mut stream =
            TcpStream::connect(&authority)
                .await
                .map_err(|source| ClientError::Connect {
                    authority: authority.clone(),
                    source,
                })?;

        stream.write_all(&request.to_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let (status, headers) = loop {
            let (status, headers) = read_head(&mut stream, &mut buf).await?;
            // Interim responses (100 Continue, 103 Early Hints) precede the real one.
            if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                debug!(upstream = %authority, status = status.as_u16(), "skipping interim response");
                continue;
            }
            break (status, headers);
        };

        let framing = Framing::for_response(request.method(), status, &headers)?;
        debug!(upstream = %authority, status = status.as_u16(), "upstream response head received");

        Ok(UpstreamResponse {
            status,
            headers,
            body: HttpBody {
                stream,
                buf,
                framing,
            },
        })
    }
}

/// How the body of an upstream response is delimited (RFC 9112 §6.3).
#[derive(Debug)]
enum Framing {
    Empty,
    Length(usize),
    Chunked(ChunkedDecoder),
    UntilClose,
}

impl Framing {
    fn for_response(
        method: &Method,
        status: StatusCode,
        headers: &Headers,
    ) -> Result<Self, ClientError> {
        if *method == Method::Head || status.forbids_body() {
            return Ok(Self::Empty);
        }
        if headers.is_chunked() {
            return Ok(Self::Chunked(ChunkedDecoder::new()));
        }
        match headers.get_bytes("content-length") {
            Some(value) => std::str::from_utf8(value)
                .ok()
                .and_then(|text| text.trim().parse().ok())
                .map(Self::Length)
                .ok_or_else(|| ClientError::InvalidContentLength {
                    value: String::from_utf8_lossy(value).into_owned(),
                }),
            None => Ok(Self::UntilClose),
        }
    }
}

/// The unread body of an [`HttpClient`] response; owns the connection.
#[derive(Debug)]
pub struct HttpBody {
    stream: TcpStream,
    buf: BytesMut,
    framing: Framing,
}

impl HttpBody {
    /// Reads more bytes into the buffer; `Ok(false)` means the peer closed.
    async fn fill(&mut self) -> Result<bool, ClientError> {
        self.buf.reserve(READ_CHUNK);
        Ok(self.stream.read_buf(&mut self.buf).await? != 0)
    }
}

impl ResponseBody for HttpBody {
    async fn collect(mut self) -> Result<Bytes, ClientError> {
        match std::mem::replace(&mut self.framing, Framing::Empty) {
            Framing::Empty => Ok(Bytes::new()),
            Framing::Length(length) => {
                while self.buf.len() < length {
                    if !self.fill().await? {
                        return Err(ClientError::ConnectionClosed);
                    }
                }
                self.buf.truncate(length);
                Ok(self.buf.freeze())
            }
            Framing::Chunked(mut decoder) => loop {
                if let Some(body) = decoder.decode(&mut self.buf)? {
                    return Ok(body);
                }
                if !self.fill().await? {
                    return Err(ClientError::ConnectionClosed);
                }
            },
            Framing::UntilClose => {
                while self.fill().await? {}
                Ok(self.buf.freeze())
            }
        }
    }
}

/// Reads and parses one response head, leaving any body bytes in `buf`.
async fn read_head(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<(StatusCode, Headers), ClientError> {
    loop {
        if let Some((status, headers, head_len)) = parse_head(buf)? {
            let _ = buf.split_to(head_len);
            return Ok((status, headers));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ClientError::HeadTooLarge {
                max_bytes: MAX_HEAD_SIZE,
            });
        }
        buf.reserve(READ_CHUNK);
        if stream.read_buf(buf).await? == 0 {
            return Err(ClientError::ConnectionClosed);
        }
    }
}

/// Parses a response head; `Ok(None)` if `buf` does not hold a complete one yet.
fn parse_head(buf: &[u8]) -> Result<Option<(StatusCode, Headers, usize)>, ClientError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut storage);

    let head_len = match response.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let code = response.code.unwrap_or_default();
    let status = StatusCode::from_u16(code).ok_or(ClientError::InvalidStatus { code })?;

    let mut headers = Headers::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        headers.insert(header.name, header.value);
    }

    Ok(Some((status, headers, head_len)))
}
