//! Caching reverse proxy handler.
//!
//! [`ProxyHandler`] turns each inbound request into either a cache hit or a
//! forwarded exchange with the single upstream:
//!
//! ```text
//! RECEIVED ─┬─ lookup hit ──────────────────────────────────────────► RESPONDED
//!           └─ lookup miss ─► build ─► send ─► read body ─► store ──► RESPONDED
//!                               │        │          │
//!                               └────────┴──────────┴─ error ───────► RESPONDED (5xx)
//! ```
//!
//! Every path responds exactly once and nothing is retried. Only the body is
//! cached: a hit is answered with `200 OK` and the default headers, whatever
//! status and headers the upstream sent when the entry was captured.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::Upstream;
use crate::http::{Headers, Method, Request, Response, StatusCode};

pub mod client;
pub mod outbound;

pub use client::{ClientError, HttpClient, ResponseBody, UpstreamClient, UpstreamResponse};
pub use outbound::{BuildError, OutboundRequest};

/// Why a miss could not be served from the upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("could not build upstream request: {0}")]
    Build(#[from] BuildError),

    #[error("upstream exchange failed: {0}")]
    Send(#[source] ClientError),

    #[error("could not read upstream body: {0}")]
    Read(#[source] ClientError),
}

impl ProxyError {
    /// Status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Build(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Send(_) | Self::Read(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn into_response(self) -> Response {
        Response::new(self.status()).body(self.to_string())
    }
}

/// Cache key for `request`: its path plus the raw query, exactly as received.
///
/// The method is not part of the key: `GET /a` and `POST /a`
/// share an entry.
pub fn fingerprint(request: &Request) -> String {
    request.target()
}

/// Forwards requests to one upstream, memoizing response bodies.
///
/// The cache is injected rather than global, so independent handlers (and
/// tests) can each own a store, or share one through the [`Arc`].
pub struct ProxyHandler<C = HttpClient> {
    upstream: Upstream,
    client: C,
    cache: Arc<CacheStore>,
}

impl<C: UpstreamClient> ProxyHandler<C> {
    pub fn new(upstream: Upstream, client: C, cache: Arc<CacheStore>) -> Self {
        Self {
            upstream,
            client,
            cache,
        }
    }

    /// The store this handler reads and populates.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Serves one request from the cache or the upstream.
    pub async fn handle(&self, request: Request) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let fingerprint = fingerprint(&request);

        // The read guard is released inside `lookup`; nothing below runs under it.
        if let Some(body) = self.cache.lookup(&fingerprint) {
            debug!(%fingerprint, bytes = body.len(), "cache hit");
            let response = Response::new(StatusCode::OK).body_bytes(body);
            info!(
                %method,
                target = %fingerprint,
                status = response.status().as_u16(),
                cache = "hit",
                elapsed = ?start.elapsed(),
                "request served"
            );
            return response;
        }

        debug!(%fingerprint, "cache miss");
        let response = match self.forward(&fingerprint, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%fingerprint, error = %e, "upstream exchange failed");
                e.into_response()
            }
        };

        info!(
            %method,
            target = %fingerprint,
            status = response.status().as_u16(),
            cache = "miss",
            elapsed = ?start.elapsed(),
            "request served"
        );
        response
    }

    async fn forward(&self, fingerprint: &str, request: Request) -> Result<Response, ProxyError> {
        let is_head = *request.method() == Method::Head;
        let outbound = OutboundRequest::build(&self.upstream, request)?;
        let UpstreamResponse {
            status,
            headers,
            body,
        } = self.client.send(outbound).await.map_err(ProxyError::Send)?;
        let body = body.collect().await.map_err(ProxyError::Read)?;

        if is_head {
            // A HEAD answer has no body; storing it would blank the entry for GET.
            debug!(%fingerprint, status = status.as_u16(), "HEAD response not cached");
            let mut response = relay(status, &headers, body);
            if let Some(length) = headers
                .get("content-length")
                .and_then(|value| value.trim().parse().ok())
            {
                response = response.declared_length(length);
            }
            return Ok(response);
        }

        // Stored whatever the status: there is no notion of a cacheable response.
        self.cache.store(fingerprint, body.clone());
        debug!(%fingerprint, bytes = body.len(), status = status.as_u16(), "cached upstream body");

        Ok(relay(status, &headers, body))
    }
}

/// Rebuilds the upstream response for the caller: status, every end-to-end
/// header in upstream order, then the body. Nothing the upstream did not send
/// is added apart from framing.
fn relay(status: StatusCode, headers: &Headers, body: Bytes) -> Response {
    let mut response = Response::new(status)
        .body_bytes(body)
        .default_content_type(false);
    for (name, value) in headers.end_to_end() {
        response.add_header(name, value);
    }
    response
}
