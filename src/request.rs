//! Exchange types seen by a gate: the inbound request and the delegate's response.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor};

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::secret::Secret;

/// Name of the header carrying bearer tokens.
pub const AUTHORIZATION: &str = "Authorization";
/// Name of the header carrying the body media type.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Multi-valued header or query map.
pub type MultiMap = HashMap<String, Vec<String>>;

/// A single-consume request body stream.
///
/// Whoever reads a body must hand back a replacement yielding the same
/// bytes; see [`Body::buffer`].
pub struct Body {
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// Why [`Body::buffer`] could not hold the whole body in memory.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The stream is longer than the limit.
    #[error("body exceeds {limit} bytes")]
    TooLarge {
        /// The limit that was exceeded
        limit: usize,
    },
    /// Reading the stream failed.
    #[error("read body: {0}")]
    Io(#[source] io::Error),
}

impl Body {
    /// Wraps any async reader as a body.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Creates a body that yields `bytes`.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// Reads at most `limit` bytes into memory.
    ///
    /// Always returns a replacement body that replays the original stream from
    /// the start: the buffered prefix followed by whatever was not read.
    pub async fn buffer(self, limit: usize) -> (Result<Bytes, BufferError>, Body) {
        let mut buf = Vec::new();
        let mut limited = self.reader.take((limit as u64).saturating_add(1));
        let read = limited.read_to_end(&mut buf).await;
        let rest = limited.into_inner();
        let bytes = Bytes::from(buf);

        match read {
            Ok(_) if bytes.len() <= limit => {
                // EOF reached inside the limit: the buffer is the whole stream.
                (Ok(bytes.clone()), Body::from_bytes(bytes))
            }
            Ok(_) => {
                let restored = Body::new(Cursor::new(bytes).chain(rest));
                (Err(BufferError::TooLarge { limit }), restored)
            }
            Err(e) => {
                let restored = Body::new(Cursor::new(bytes).chain(rest));
                (Err(BufferError::Io(e)), restored)
            }
        }
    }

    /// Reads the whole body.
    pub async fn read_to_end(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Body { .. }")
    }
}

/// An inbound request as handed to a gate by the transport layer.
///
/// # Examples
///
/// ```
/// use policy_gate::Request;
///
/// let req = Request::new("GET", "/users/42")
///     .with_param("id", "42")
///     .with_header("Accept", "application/json")
///     .with_query("page", "2");
///
/// assert_eq!(req.header("Accept"), Some("application/json"));
/// ```
#[derive(Default)]
pub struct Request {
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Path parameters resolved by routing
    pub params: HashMap<String, String>,
    /// Request headers
    pub headers: MultiMap,
    /// Query string parameters
    pub query: MultiMap,
    /// Request body, if any
    pub body: Option<Body>,
}

impl Request {
    /// Creates a request with no params, headers, query or body.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Adds a path parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Appends a header value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Appends a query parameter value.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the first value of a header. Lookup is case-sensitive.
    pub fn header(&self, key: &str) -> Option<&str> {
        first(&self.headers, key)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: HashMap<&str, HeaderDebug<'_>> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let shown = if k == AUTHORIZATION {
                    HeaderDebug::Redacted(Secret::new(v))
                } else {
                    HeaderDebug::Plain(v)
                };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("headers", &headers)
            .field("query", &self.query)
            .field("body", &self.body)
            .finish()
    }
}

enum HeaderDebug<'a> {
    Plain(&'a Vec<String>),
    Redacted(Secret<&'a Vec<String>>),
}

impl fmt::Debug for HeaderDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderDebug::Plain(v) => fmt::Debug::fmt(v, f),
            HeaderDebug::Redacted(s) => fmt::Debug::fmt(s, f),
        }
    }
}

/// Response metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    /// Status code reported by the backend
    pub status_code: u16,
    /// Response headers
    pub headers: MultiMap,
}

/// A response produced by the delegate stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    /// Decoded response payload
    pub data: Map<String, Value>,
    /// Whether the backend call completed fully
    pub is_complete: bool,
    /// Status and headers
    pub metadata: Metadata,
}

impl Response {
    /// Creates a completed response with the given status and no payload.
    pub fn new(status_code: u16) -> Self {
        Self {
            is_complete: true,
            metadata: Metadata {
                status_code,
                headers: MultiMap::new(),
            },
            ..Self::default()
        }
    }

    /// Adds a payload field.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Appends a response header value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .headers
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }
}

pub(crate) fn first<'a>(map: &'a MultiMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(|v| v.first()).map(String::as_str)
}
