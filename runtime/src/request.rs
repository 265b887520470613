//! The inbound request abstraction.
//!
//! The core never parses raw bytes: a transport adapter (see
//! `trellis-http`) hands over a fully-parsed request and consumes the
//! response the dispatcher produces.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST};
use http::{HeaderMap, Method};

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query_string: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            query_string: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a GET request, handy in tests and examples.
    pub fn get(path: impl Into<String>) -> Self {
        Request::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Request::new(Method::POST, path)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    /// Attach a header. Invalid names or values are dropped with a warning
    /// rather than panicking mid-construction.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!("dropping invalid header on request builder"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Host header with any port stripped, as used for subdomain matching.
    pub fn host(&self) -> Option<&str> {
        let raw = self.headers.get(HOST)?.to_str().ok()?;
        Some(strip_port(raw))
    }

    /// Decoded query-string pairs. A malformed query decodes to nothing.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(&self.query_string).unwrap_or_default()
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Request {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query_string: parts.uri.query().unwrap_or_default().to_string(),
            headers: parts.headers,
            body,
        }
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
