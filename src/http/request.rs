//! Streaming HTTP/1.1 request decoding using the [`httparse`] crate.
//!
//! A connection's read buffer is fed to [`RequestDecoder::decode`], which
//! yields each request as three ordered parts: [`RequestPart::Head`],
//! exactly one [`RequestPart::Body`] (possibly empty) and [`RequestPart::End`].

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method, StatusCode, Version};

/// Errors that can occur while decoding a request from the wire.
///
/// All of them are fatal for the connection: after one is returned the
/// stream position is unknown and the connection must be closed.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length value: {value:?}")]
    InvalidContentLength { value: String },

    #[error("chunked transfer encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("request exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

impl RequestError {
    /// The status sent back before the connection is closed.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge { .. } => StatusCode::PayloadTooLarge,
            Self::UnsupportedTransferEncoding => StatusCode::NotImplemented,
            _ => StatusCode::BadRequest,
        }
    }
}

/// The request line and headers of one HTTP request.
///
/// # Examples
///
/// ```
/// use business_processor::http::{Method, RequestHead};
///
/// let raw = b"POST /benchmark?trace=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
/// let (head, offset) = RequestHead::parse(raw).unwrap().unwrap();
///
/// assert_eq!(head.method(), &Method::Post);
/// assert_eq!(head.path(), "/benchmark");
/// assert_eq!(head.query_string(), Some("trace=1"));
/// assert_eq!(&raw[offset..], b"{}");
/// ```
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
}

impl RequestHead {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds a head without headers or query string.
    pub fn new(method: Method, path: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            version,
            headers: Headers::new(),
        }
    }

    /// Parses a request head from the start of `buf`.
    ///
    /// Returns `Ok(None)` while the `\r\n\r\n` terminator has not arrived,
    /// otherwise the head and the offset at which the body begins.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Ok(None),
        };

        let method: Method = match raw_req.method {
            Some(m) => m.parse().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .map(Version::from_minor)
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok(Some((
            Self {
                method,
                path,
                query,
                version,
                headers: header_map,
            },
            body_offset,
        )))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` if the connection should stay open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        match self.version {
            Version::Http11 => true,
            Version::Http10 => self.headers.has_token("connection", "keep-alive"),
        }
    }

    /// Returns the declared body length, `None` when no `Content-Length` is present.
    pub fn content_length(&self) -> Result<Option<usize>, RequestError> {
        match self.headers.get("content-length") {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| RequestError::InvalidContentLength {
                    value: raw.to_owned(),
                }),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.headers.has_token("transfer-encoding", "chunked")
    }
}

/// One framing unit of an inbound request.
#[derive(Debug, Clone)]
pub enum RequestPart {
    Head(RequestHead),
    Body(Bytes),
    End,
}

impl RequestPart {
    /// Short name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Head(_) => "head",
            Self::Body(_) => "body",
            Self::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Head,
    Body(usize),
    End,
}

/// Incremental splitter turning a connection's read buffer into [`RequestPart`]s.
///
/// Bodies are framed by `Content-Length` only; a request without one has an
/// empty body.
#[derive(Debug)]
pub struct RequestDecoder {
    expect: Expect,
    max_request_bytes: usize,
}

impl RequestDecoder {
    /// Largest request (head plus body) buffered by default: 8 MiB.
    pub const DEFAULT_MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

    pub fn new(max_request_bytes: usize) -> Self {
        Self {
            expect: Expect::Head,
            max_request_bytes,
        }
    }

    /// Returns `true` between a decoded head and its end part.
    pub fn is_mid_message(&self) -> bool {
        self.expect != Expect::Head
    }

    /// Decodes the next part from `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestPart>, RequestError> {
        match self.expect {
            Expect::Head => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let Some((head, body_offset)) = RequestHead::parse(&buf[..])? else {
                    if buf.len() > self.max_request_bytes {
                        return Err(RequestError::TooLarge {
                            max_bytes: self.max_request_bytes,
                        });
                    }
                    return Ok(None);
                };

                if head.is_chunked() {
                    return Err(RequestError::UnsupportedTransferEncoding);
                }
                let content_length = head.content_length()?.unwrap_or(0);
                if body_offset.saturating_add(content_length) > self.max_request_bytes {
                    return Err(RequestError::TooLarge {
                        max_bytes: self.max_request_bytes,
                    });
                }

                buf.advance(body_offset);
                self.expect = Expect::Body(content_length);
                Ok(Some(RequestPart::Head(head)))
            }
            Expect::Body(len) => {
                if buf.len() < len {
                    buf.reserve(len - buf.len());
                    return Ok(None);
                }
                self.expect = Expect::End;
                Ok(Some(RequestPart::Body(buf.split_to(len).freeze())))
            }
            Expect::End => {
                self.expect = Expect::Head;
                Ok(Some(RequestPart::End))
            }
        }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_REQUEST_BYTES)
    }
}
