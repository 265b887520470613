//! The outbound response abstraction and handler return-value coercion.

use crate::error::HandlerError;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A 200 text response with the framework's default mimetype.
    pub fn text(body: impl Into<String>) -> Self {
        let mut response = Response::new(StatusCode::OK);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response.body = Bytes::from(body.into());
        response
    }

    /// A 200 JSON response. Serialization failure surfaces as a
    /// [`HandlerError`] and travels the normal error path.
    pub fn json(value: &impl Serialize) -> Result<Self, HandlerError> {
        let body = serde_json::to_vec(value).map_err(HandlerError::new)?;
        let mut response = Response::new(StatusCode::OK);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = Bytes::from(body);
        Ok(response)
    }

    /// A redirect to `location`. Fails if the location is not a legal
    /// header value.
    pub fn redirect(location: &str, status: StatusCode) -> Result<Self, HandlerError> {
        let value = HeaderValue::try_from(location)
            .map_err(|_| HandlerError::msg(format!("invalid redirect location `{location}`")))?;
        let mut response = Response::new(status);
        response.headers.insert(LOCATION, value);
        Ok(response)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Insert a header from string parts, rejecting malformed input.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<(), HandlerError> {
        let name = HeaderName::try_from(name)
            .map_err(|_| HandlerError::msg(format!("invalid header name `{name}`")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|_| HandlerError::msg(format!("invalid header value for `{name}`")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn status(&self) -> StatusCode {
        self.status
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

    /// Body as lossy UTF-8, for assertions and debug output.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

/// What a handler may return, before coercion into a [`Response`].
///
/// The set is closed and [`into_response`](ResponseLike::into_response) is
/// total: an unrepresentable shape is a compile error, and a malformed one
/// (bad status code, bad header) is an explicit [`HandlerError`], never a
/// best-effort guess.
#[derive(Debug, Clone)]
pub enum ResponseLike {
    /// Plain body, status 200.
    Text(String),
    /// JSON body, status 200.
    Json(Value),
    /// Body plus explicit status and headers.
    Parts {
        body: String,
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// A fully-formed response, passed through untouched.
    Response(Response),
}

impl ResponseLike {
    /// Serialize any `Serialize` value into the JSON variant.
    pub fn json(value: impl Serialize) -> Result<Self, HandlerError> {
        Ok(ResponseLike::Json(
            serde_json::to_value(value).map_err(HandlerError::new)?,
        ))
    }

    /// Coerce into a canonical response.
    pub fn into_response(self) -> Result<Response, HandlerError> {
        match self {
            ResponseLike::Text(body) => Ok(Response::text(body)),
            ResponseLike::Json(value) => Response::json(&value),
            ResponseLike::Parts {
                body,
                status,
                headers,
            } => {
                let status = StatusCode::from_u16(status).map_err(|_| {
                    HandlerError::msg(format!("invalid status code {status} in handler return"))
                })?;
                let mut response = Response::text(body).with_status(status);
                for (name, value) in &headers {
                    response.insert_header(name, value)?;
                }
                Ok(response)
            }
            ResponseLike::Response(response) => Ok(response),
        }
    }
}

impl From<&str> for ResponseLike {
    fn from(body: &str) -> Self {
        ResponseLike::Text(body.to_string())
    }
}

impl From<String> for ResponseLike {
    fn from(body: String) -> Self {
        ResponseLike::Text(body)
    }
}

impl From<(String, u16)> for ResponseLike {
    fn from((body, status): (String, u16)) -> Self {
        ResponseLike::Parts {
            body,
            status,
            headers: Vec::new(),
        }
    }
}

impl From<(&str, u16)> for ResponseLike {
    fn from((body, status): (&str, u16)) -> Self {
        ResponseLike::Parts {
            body: body.to_string(),
            status,
            headers: Vec::new(),
        }
    }
}

impl From<(String, u16, Vec<(String, String)>)> for ResponseLike {
    fn from((body, status, headers): (String, u16, Vec<(String, String)>)) -> Self {
        ResponseLike::Parts {
            body,
            status,
            headers,
        }
    }
}

impl From<Value> for ResponseLike {
    fn from(value: Value) -> Self {
        ResponseLike::Json(value)
    }
}

impl From<Response> for ResponseLike {
    fn from(response: Response) -> Self {
        ResponseLike::Response(response)
    }
}
