//! # HTTP Request
//!
//! Inbound request wrapper: method, path, headers, query map and the
//! collected body, detached from hyper so the pipeline can run without a
//! socket.

use crate::dispatch::DispatchKey;
use crate::error::{Error, Result};
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::Request;
use serde_json::Value;
use std::collections::HashMap;

/// Request data as received
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Upper-case method name as sent by the client
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    query_string: Option<String>,
    query_params: HashMap<String, String>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl GatewayRequest {
    /// Create a request manually (tests and in-process calls)
    ///
    /// `path` may carry a query string.
    pub fn new(
        method: &str,
        path: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        let query_params = parse_query_string(query_string.as_deref());

        let mut headers = HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                headers.insert(n, v);
            }
        }

        Self {
            method: method.to_uppercase(),
            path,
            query_string,
            query_params,
            headers,
            body,
        }
    }

    /// Create from a hyper request, enforcing a body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` when either the declared
    /// `Content-Length` or the collected body exceeds `max_body_size`, and
    /// `Error::Http` when the body stream fails.
    pub async fn from_hyper_with_limit(
        req: Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = req.method().as_str().to_uppercase();
        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let query_params = parse_query_string(query_string.as_deref());
        let headers = req.headers().clone();

        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(len) = declared {
            if len > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: len,
                });
            }
        }

        let bytes = req.into_body().collect().await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            method,
            path,
            query_string,
            query_params,
            headers,
            body: (!bytes.is_empty()).then_some(bytes),
        })
    }

    /// Dispatch key for this request
    #[must_use]
    pub fn key(&self) -> DispatchKey {
        DispatchKey::new(&self.path, &self.method)
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Get all headers as a HashMap
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }

    /// Get query parameters
    #[must_use]
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Whether the content type allows reading the body as JSON
    ///
    /// A missing content type counts as JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |ct| ct.to_ascii_lowercase().contains("json"))
    }

    /// Parse the body as JSON
    ///
    /// Returns `Ok(None)` when there is no body, the body is only whitespace,
    /// or the content type is not JSON.
    ///
    /// # Errors
    ///
    /// Returns the parser error for a malformed JSON body.
    pub fn json_body(&self) -> serde_json::Result<Option<Value>> {
        let Some(bytes) = self.body_bytes() else {
            return Ok(None);
        };
        if !self.is_json() || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(bytes).map(Some)
    }
}

/// Parse query string into HashMap
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page").map(String::as_str), Some("1"));
        assert_eq!(result.get("limit").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert!(parse_query_string(None).is_empty());
        assert!(parse_query_string(Some("")).is_empty());
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York&flag"));
        assert_eq!(result.get("name").map(String::as_str), Some("John Doe"));
        assert_eq!(result.get("city").map(String::as_str), Some("New York"));
        assert_eq!(result.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("%C3%A7"), "ç");
        assert_eq!(url_decode("50%"), "50%");
        assert_eq!(url_decode("%zz"), "%zz");
    }

    #[test]
    fn test_key_from_request() {
        let req = GatewayRequest::new("post", "/API/Users?x=1", HashMap::new(), None);
        assert_eq!(req.key().as_str(), "/api/users:POST");
        assert_eq!(req.query_string(), Some("x=1"));
    }

    #[test]
    fn test_json_body() {
        let req = GatewayRequest::new(
            "POST",
            "/a",
            headers(&[("content-type", "application/json; charset=utf-8")]),
            Some(Bytes::from_static(br#"{"a": 1}"#)),
        );
        let body = req.json_body().unwrap().unwrap();
        assert_eq!(body["a"], 1);
    }

    #[test]
    fn test_json_body_absent_cases() {
        let empty = GatewayRequest::new("POST", "/a", HashMap::new(), None);
        assert!(empty.json_body().unwrap().is_none());

        let blank = GatewayRequest::new("POST", "/a", HashMap::new(), Some(Bytes::from_static(b"  \n")));
        assert!(blank.json_body().unwrap().is_none());

        let text = GatewayRequest::new(
            "POST",
            "/a",
            headers(&[("content-type", "text/plain")]),
            Some(Bytes::from_static(b"hello")),
        );
        assert!(text.json_body().unwrap().is_none());
    }

    #[test]
    fn test_json_body_invalid() {
        let req = GatewayRequest::new("POST", "/a", HashMap::new(), Some(Bytes::from_static(b"{oops")));
        assert!(req.json_body().is_err());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut req = GatewayRequest::new("GET", "/a", headers(&[("Authorization", "Bearer x")]), None);
        assert_eq!(req.header("authorization"), Some("Bearer x"));
        req.set_header("x-request-id", "abc");
        assert_eq!(req.headers_map().get("x-request-id").map(String::as_str), Some("abc"));
    }
}
