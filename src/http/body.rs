//! Message body framing shared by the server and the upstream client.
//!
//! Identity bodies (`Content-Length`) are trivial to frame, so this module
//! only holds the incremental decoder for `Transfer-Encoding: chunked`
//! (RFC 9112 §7.1):
//!
//! ```text
//! chunked-body   = *chunk last-chunk trailer-section CRLF
//! chunk          = chunk-size [ chunk-ext ] CRLF chunk-data CRLF
//! last-chunk     = 1*("0") [ chunk-ext ] CRLF
//! ```

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors produced while decoding a chunked body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("invalid chunk size line")]
    InvalidChunkSize,

    #[error("chunk data not terminated by CRLF")]
    MissingChunkTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a complete `size[;ext]\r\n` line.
    Size,
    /// Copying chunk data; holds the bytes still owed by the current chunk.
    Data(usize),
    /// Expecting the `\r\n` after chunk data.
    DataEnd,
    /// Skipping trailer fields until the empty line.
    Trailer,
    Done,
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies.
///
/// Feed it the connection's read buffer after every read; it consumes exactly
/// the bytes belonging to the body and leaves anything after the terminating
/// empty line (a pipelined request, for instance) in the buffer.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use rcproxy::http::body::ChunkedDecoder;
///
/// let mut decoder = ChunkedDecoder::new();
/// let mut buf = BytesMut::from(&b"5\r\nhello\r\n"[..]);
/// assert_eq!(decoder.decode(&mut buf).unwrap(), None);
///
/// buf.extend_from_slice(b"0\r\n\r\nGET");
/// let body = decoder.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(&body[..], b"hello");
/// assert_eq!(&buf[..], b"GET");
/// ```
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    body: BytesMut,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    /// Creates a decoder positioned before the first chunk-size line.
    pub fn new() -> Self {
        Self {
            state: State::Size,
            body: BytesMut::new(),
        }
    }

    /// Number of decoded body bytes accumulated so far.
    pub fn decoded_len(&self) -> usize {
        self.body.len()
    }

    /// Consumes as much of `buf` as possible.
    ///
    /// Returns `Ok(Some(body))` once the last chunk and trailer section have
    /// been read, `Ok(None)` if more input is needed.
    ///
    /// # Errors
    ///
    /// - [`BodyError::InvalidChunkSize`]: the size line is not valid hex or overflows.
    /// - [`BodyError::MissingChunkTerminator`]: chunk data is not followed by `\r\n`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, BodyError> {
        loop {
            match self.state {
                State::Size => match httparse::parse_chunk_size(buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        buf.advance(consumed);
                        self.state = if size == 0 {
                            State::Trailer
                        } else {
                            let size =
                                usize::try_from(size).map_err(|_| BodyError::InvalidChunkSize)?;
                            State::Data(size)
                        };
                    }
                    Ok(httparse::Status::Partial) => return Ok(None),
                    Err(httparse::InvalidChunkSize) => return Err(BodyError::InvalidChunkSize),
                },
                State::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf.split_to(take));
                    self.state = if take == remaining {
                        State::DataEnd
                    } else {
                        State::Data(remaining - take)
                    };
                }
                State::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(BodyError::MissingChunkTerminator);
                    }
                    buf.advance(2);
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(line_len) = buf.windows(2).position(|w| w == b"\r\n") else {
                        return Ok(None);
                    };
                    buf.advance(line_len + 2);
                    if line_len == 0 {
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(Some(self.body.split().freeze())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pass() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"[..]);
        let body = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&body[..], b"Wikipedia");
        assert!(buf.is_empty());
    }

    #[test]
    fn byte_at_a_time() {
        let raw = b"3;ext=1\r\nabc\r\nA\r\n0123456789\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::new();
        let mut result = None;
        for byte in raw {
            buf.extend_from_slice(&[*byte]);
            if let Some(body) = decoder.decode(&mut buf).unwrap() {
                result = Some(body);
            }
        }
        assert_eq!(result.as_deref(), Some(&b"abc0123456789"[..]));
    }

    #[test]
    fn trailers_are_skipped() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"2\r\nok\r\n0\r\nX-Checksum: abc\r\n\r\nrest"[..]);
        let body = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&body[..], b"ok");
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn invalid_size() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert_eq!(decoder.decode(&mut buf), Err(BodyError::InvalidChunkSize));
    }

    #[test]
    fn missing_terminator() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"2\r\nokXX"[..]);
        assert_eq!(
            decoder.decode(&mut buf),
            Err(BodyError::MissingChunkTerminator)
        );
    }

    #[test]
    fn tracks_decoded_len() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"5\r\nhel"[..]);
        assert_eq!(decoder.decode(&mut buf), Ok(None));
        assert_eq!(decoder.decoded_len(), 3);
    }
}
