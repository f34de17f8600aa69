//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports HTTP/1.1 persistent connections (keep-alive), `Content-Length` and
//! chunked request bodies, and `Expect: 100-continue`.

use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    body::ChunkedDecoder,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Interim response sent to clients waiting on `Expect: 100-continue`.
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// The HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use rcproxy::server::Server;
/// use rcproxy::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::OK).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// Runs until the process is terminated. See [`run_until`](Self::run_until).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// The handler receives a [`Request`] with its body already read and must
    /// return a [`Future`] that resolves to a [`Response`]. It is wrapped in an
    /// [`Arc`] and shared across all spawned Tokio tasks, one per connection.
    ///
    /// Once `shutdown` resolves the listener is closed; connections that were
    /// already accepted keep running on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");

        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutting down listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    while let Some(request) = read_request(&mut stream, &mut buf, peer_addr).await? {
        let keep_alive = request.is_keep_alive();
        let head_request = *request.method() == Method::Head;

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request)
            .await
            .keep_alive(keep_alive)
            .head_request(head_request);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "client requested close");
            break;
        }
    }

    Ok(())
}

/// Reads one complete request (head and body) from the connection.
///
/// Returns `Ok(None)` when the connection should end: the peer closed it, or
/// the request was rejected and an error response has already been written.
/// Bytes past the end of the request stay in `buf` for the next iteration.
async fn read_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    peer_addr: SocketAddr,
) -> Result<Option<Request>, std::io::Error> {
    let (mut request, body_offset) = loop {
        match Request::parse(buf) {
            Ok(pair) => break pair,
            Err(RequestError::Incomplete) => {}
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "rejecting malformed request");
                reject(stream, StatusCode::BAD_REQUEST, format!("Bad Request: {e}")).await?;
                return Ok(None);
            }
        }

        // Guard against excessively large request heads.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "rejecting oversized request");
            reject(stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large").await?;
            return Ok(None);
        }

        if stream.read_buf(buf).await? == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(None);
        }
    };

    // Drop the head; only body bytes (and anything pipelined) remain.
    let _ = buf.split_to(body_offset);

    if request.expects_continue() && buf.is_empty() {
        stream.write_all(CONTINUE).await?;
    }

    let body = if request.is_chunked() {
        let mut decoder = ChunkedDecoder::new();
        loop {
            match decoder.decode(buf) {
                Ok(Some(body)) => break body,
                Ok(None) => {}
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "rejecting malformed chunked body");
                    reject(stream, StatusCode::BAD_REQUEST, format!("Bad Request: {e}")).await?;
                    return Ok(None);
                }
            }
            if chunked_body_too_large(&decoder, buf) {
                warn!(peer = %peer_addr, "rejecting oversized request");
                reject(stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large").await?;
                return Ok(None);
            }
            if stream.read_buf(buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed mid-body");
                return Ok(None);
            }
        }
    } else {
        let content_length = request.content_length().unwrap_or(0);
        if content_length > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, content_length, "rejecting oversized request");
            reject(stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large").await?;
            return Ok(None);
        }
        // Wait for the full body to arrive.
        while buf.len() < content_length {
            if stream.read_buf(buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed mid-body");
                return Ok(None);
            }
        }
        buf.split_to(content_length).freeze()
    };

    request.set_body(body);
    Ok(Some(request))
}

/// The decoded body plus whatever framing is still buffered (an unfinished
/// size line or trailer) must stay under [`MAX_REQUEST_SIZE`].
fn chunked_body_too_large(decoder: &ChunkedDecoder, buf: &BytesMut) -> bool {
    decoder.decoded_len().saturating_add(buf.len()) > MAX_REQUEST_SIZE
}

/// Writes an error response that also closes the connection.
async fn reject(
    stream: &mut TcpStream,
    status: StatusCode,
    message: impl Into<String>,
) -> Result<(), std::io::Error> {
    let response = Response::new(status).body(message).keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await
}
