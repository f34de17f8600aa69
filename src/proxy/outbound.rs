//! Inbound → upstream request translation.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::config::Upstream;
use crate::http::{Headers, Method, Request};

/// Errors produced while building an outbound request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// Only origin-form targets (`/path?query`) can be forwarded; this covers
    /// `CONNECT host:port` and `OPTIONS *`.
    #[error("cannot forward request target {target:?}")]
    UnsupportedTarget { target: String },
}

/// A request addressed to the upstream, derived from an inbound [`Request`].
///
/// Only the authority changes: method, path, query, headers and body bytes
/// are carried over as received. `Host` is replaced by the upstream
/// authority, framing headers are recomputed on serialization, and `Expect`
/// is dropped because the body has already been read.
///
/// # Examples
///
/// ```
/// use rcproxy::config::Upstream;
/// use rcproxy::http::Request;
/// use rcproxy::proxy::OutboundRequest;
///
/// let upstream = Upstream::parse("http://backend:9000").unwrap();
/// let (inbound, _) = Request::parse(b"GET /get?x=1 HTTP/1.1\r\nHost: proxy\r\n\r\n").unwrap();
///
/// let outbound = OutboundRequest::build(&upstream, inbound).unwrap();
/// let wire = outbound.to_bytes();
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("GET /get?x=1 HTTP/1.1\r\nHost: backend:9000\r\n"));
/// ```
#[derive(Debug)]
pub struct OutboundRequest {
    upstream: Upstream,
    method: Method,
    target: String,
    headers: Headers,
    body: Bytes,
}

impl OutboundRequest {
    /// Builds the upstream request for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::UnsupportedTarget`] when the inbound target is not
    /// in origin form.
    pub fn build(upstream: &Upstream, request: Request) -> Result<Self, BuildError> {
        let target = request.target();
        if !target.starts_with('/') {
            return Err(BuildError::UnsupportedTarget { target });
        }

        let (method, inbound_headers, body) = request.into_parts();

        let mut headers = Headers::with_capacity(inbound_headers.len());
        for (name, value) in inbound_headers.end_to_end() {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("expect") {
                continue;
            }
            headers.insert(name, value);
        }

        Ok(Self {
            upstream: upstream.clone(),
            method,
            target,
            headers,
            body,
        })
    }

    /// The backend this request is addressed to.
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Origin-form target (`/path?query`).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Forwarded end-to-end headers (without `Host`).
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the request in HTTP/1.1 wire format.
    ///
    /// Writes `Host`, the forwarded headers in order, `Connection: close`
    /// (one exchange per connection), and `Content-Length` whenever there is a
    /// body or the method defines one.
    pub fn to_bytes(&self) -> BytesMut {
        let estimated_size = 128 + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, self.target).as_bytes());
        buf.put(format!("Host: {}\r\n", self.upstream.authority()).as_bytes());
        for (name, value) in self.headers.iter() {
            buf.put(name.as_bytes());
            buf.put(&b": "[..]);
            buf.put(value);
            buf.put(&b"\r\n"[..]);
        }
        buf.put(&b"Connection: close\r\n"[..]);
        if !self.body.is_empty() || self.method.defines_request_body() {
            buf.put(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.clone());

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> Upstream {
        Upstream::parse("http://127.0.0.1:9000").unwrap()
    }

    fn inbound(raw: &[u8]) -> Request {
        let (mut request, offset) = Request::parse(raw).unwrap();
        request.set_body(Bytes::copy_from_slice(&raw[offset..]));
        request
    }

    fn wire(outbound: &OutboundRequest) -> String {
        String::from_utf8(outbound.to_bytes().to_vec()).unwrap()
    }

    #[test]
    fn preserves_method_target_and_headers() {
        let request = inbound(
            b"DELETE /items/7?force=true HTTP/1.1\r\nHost: proxy.local\r\nAuthorization: Bearer t\r\nX-Tag: a\r\nX-Tag: b\r\n\r\n",
        );
        let outbound = OutboundRequest::build(&upstream(), request).unwrap();

        assert_eq!(outbound.method(), &Method::Delete);
        assert_eq!(outbound.target(), "/items/7?force=true");
        let forwarded: Vec<_> = outbound.headers().iter().collect();
        assert_eq!(
            forwarded,
            vec![
                ("Authorization", &b"Bearer t"[..]),
                ("X-Tag", &b"a"[..]),
                ("X-Tag", &b"b"[..])
            ]
        );

        let text = wire(&outbound);
        assert!(text.starts_with("DELETE /items/7?force=true HTTP/1.1\r\nHost: 127.0.0.1:9000\r\n"));
        assert!(!text.contains("proxy.local"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn body_passes_through_untouched() {
        let request = inbound(
            b"POST /submit HTTP/1.1\r\nHost: proxy\r\nContent-Type: application/json\r\nContent-Length: 7\r\nExpect: 100-continue\r\n\r\n{\"x\":1}",
        );
        let outbound = OutboundRequest::build(&upstream(), request).unwrap();
        assert_eq!(&outbound.body()[..], b"{\"x\":1}");

        let text = wire(&outbound);
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert_eq!(text.matches("Content-Length").count(), 1);
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(!text.contains("Expect"));
        assert!(text.ends_with("\r\n\r\n{\"x\":1}"));
    }

    #[test]
    fn non_utf8_header_is_forwarded() {
        let request = inbound(b"GET /f HTTP/1.1\r\nHost: proxy\r\nX-Name: caf\xe9\r\n\r\n");
        let outbound = OutboundRequest::build(&upstream(), request).unwrap();
        assert_eq!(outbound.headers().get_bytes("x-name"), Some(&b"caf\xe9"[..]));

        let wire = outbound.to_bytes();
        assert!(wire.windows(14).any(|w| w == &b"X-Name: caf\xe9\r\n"[..]));
    }

    #[test]
    fn empty_post_still_declares_length() {
        let request = inbound(b"POST /ping HTTP/1.1\r\nHost: proxy\r\n\r\n");
        let outbound = OutboundRequest::build(&upstream(), request).unwrap();
        assert!(wire(&outbound).contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn chunked_inbound_is_sent_with_length() {
        let (mut request, _) = Request::parse(
            b"PUT /blob HTTP/1.1\r\nHost: proxy\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .unwrap();
        request.set_body(Bytes::from_static(b"decoded"));
        let outbound = OutboundRequest::build(&upstream(), request).unwrap();

        let text = wire(&outbound);
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.contains("Content-Length: 7\r\n"));
    }

    #[test]
    fn default_port_is_omitted_from_host() {
        let upstream = Upstream::parse("http://httpbin.org").unwrap();
        let request = inbound(b"GET / HTTP/1.1\r\nHost: proxy\r\n\r\n");
        let outbound = OutboundRequest::build(&upstream, request).unwrap();
        assert!(wire(&outbound).contains("Host: httpbin.org\r\n"));
    }

    #[test]
    fn rejects_authority_form() {
        let request = inbound(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n");
        assert_eq!(
            OutboundRequest::build(&upstream(), request).unwrap_err(),
            BuildError::UnsupportedTarget {
                target: "example.com:443".to_owned()
            }
        );
    }

    #[test]
    fn rejects_asterisk_form() {
        let request = inbound(b"OPTIONS * HTTP/1.1\r\nHost: proxy\r\n\r\n");
        assert!(OutboundRequest::build(&upstream(), request).is_err());
    }
}
