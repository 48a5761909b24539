//! The buffered view of an inbound HTTP request that the authenticator works on.

use http::header::{HeaderName, AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method};
use percent_encoding::percent_decode_str;

use crate::signer::RequestParts;
use crate::{AuthError, HttpMethod};

/// Query parameter that may carry the `Authorization` value for browser flows.
pub const AUTHORIZATION_PARAM: &str = "Authorization";

/// A request whose body has already been read into memory, so it can be
/// hashed for signature checks and still be handed on afterwards.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Decoded name/value pairs in arrival order.
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn parts(&self) -> RequestParts<'_> {
        RequestParts {
            method: &self.method,
            path: &self.path,
            headers: &self.headers,
            query: &self.query,
            body: &self.body,
        }
    }

    /// The `Authorization` header, or the query parameter of the same name.
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                self.query
                    .iter()
                    .find(|(k, _)| k == AUTHORIZATION_PARAM)
                    .map(|(_, v)| v.as_str())
            })
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn http_method(&self) -> Result<HttpMethod, AuthError> {
        HttpMethod::try_from(&self.method).map_err(|_| AuthError::MalformedRequest)
    }
}

impl From<http::Request<Vec<u8>>> for InboundRequest {
    fn from(request: http::Request<Vec<u8>>) -> Self {
        let (parts, body) = request.into_parts();
        let query = parts.uri.query().map(parse_query).unwrap_or_default();
        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            headers: parts.headers,
            query,
            body,
        }
    }
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    let decode = |s: &str| percent_decode_str(&s.replace('+', " ")).decode_utf8_lossy().into_owned();
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}
