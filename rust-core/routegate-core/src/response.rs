//! # Responses
//!
//! Every response leaves the gateway wrapped in an [`Envelope`]:
//!
//! ```json
//! {"result": "ok", "data": {...}}
//! {"result": "error", "type": "processing", "errorCode": "...", "message": "...", "data": null}
//! ```

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Error codes emitted by the pipeline itself
pub mod codes {
    /// No route for the dispatch key
    pub const HANDLER_NOT_FOUND: &str = "handler_not_found";
    /// Body is not valid JSON
    pub const INVALID_JSON: &str = "invalid_json";
    /// Body failed schema validation
    pub const VALIDATION_FAILED: &str = "validation_failed";
    /// Body exceeds the configured limit
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    /// Request could not be read
    pub const BAD_REQUEST: &str = "bad_request";
    /// Anything unexpected
    pub const INTERNAL_SERVER_ERROR: &str = "internal_server_error";
}

/// Result marker in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Success
    Ok,
    /// Failure
    Error,
}

/// Response body shape shared by every endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// `ok` or `error`
    pub result: Outcome,
    /// Error category, present on errors
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Payload
    pub data: Value,
}

impl Envelope {
    /// Success envelope
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            result: Outcome::Ok,
            kind: None,
            message: None,
            error_code: None,
            data,
        }
    }

    /// Error envelope of type `processing`
    #[must_use]
    pub fn error(error_code: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            result: Outcome::Error,
            kind: Some("processing".to_string()),
            message: Some(message.into()),
            error_code: Some(error_code.into()),
            data,
        }
    }

    /// Attach a message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// HTTP response produced by the pipeline and by handlers
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Extra response headers
    pub headers: HashMap<String, String>,
}

impl Default for ApiResponse {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
            headers: HashMap::new(),
        }
    }
}

impl ApiResponse {
    /// Serialize an envelope with the given status
    #[must_use]
    pub fn envelope(status: u16, envelope: &Envelope) -> Self {
        let body = serde_json::to_string(envelope).unwrap_or_else(|_| {
            r#"{"result":"error","type":"processing","errorCode":"internal_server_error","message":"Something went wrong","data":null}"#
                .to_string()
        });
        Self {
            status,
            body,
            ..Self::default()
        }
    }

    /// 200 with `{"result": "ok", "data": data}`
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self::envelope(200, &Envelope::ok(data))
    }

    /// 201 with an ok envelope
    #[must_use]
    pub fn created(data: Value) -> Self {
        Self::envelope(201, &Envelope::ok(data))
    }

    /// Error envelope with the given status
    #[must_use]
    pub fn error(status: u16, error_code: &str, message: &str, data: Value) -> Self {
        Self::envelope(status, &Envelope::error(error_code, message, data))
    }

    /// Generic 500, never carrying internal detail
    #[must_use]
    pub fn internal_error() -> Self {
        Self::error(
            500,
            codes::INTERNAL_SERVER_ERROR,
            "Something went wrong. Please try again later.",
            Value::Null,
        )
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers.insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    /// Header value set on this response
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Parse the body back into JSON
    ///
    /// # Errors
    ///
    /// Returns the parser error when the body is not JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.body)
    }

    /// Convert to hyper Response
    pub(crate) fn into_hyper(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = Response::builder()
            .status(status)
            .header("Content-Type", &self.content_type);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Full::new(Bytes::from_static(
                    b"{\"result\":\"error\",\"errorCode\":\"internal_server_error\"}",
                )));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_envelope_shape() {
        let resp = ApiResponse::ok(json!({"id": 7}));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");

        let body = resp.json().unwrap();
        assert_eq!(body, json!({"result": "ok", "data": {"id": 7}}));
    }

    #[test]
    fn test_error_envelope_shape() {
        let resp = ApiResponse::error(401, "missing_jwt_token", "Missing token", Value::Null);
        assert_eq!(resp.status, 401);

        let body = resp.json().unwrap();
        assert_eq!(body["result"], "error");
        assert_eq!(body["type"], "processing");
        assert_eq!(body["errorCode"], "missing_jwt_token");
        assert_eq!(body["message"], "Missing token");
        assert!(body["data"].is_null());
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let body = ApiResponse::internal_error().json().unwrap();
        assert_eq!(body["errorCode"], "internal_server_error");
    }

    #[test]
    fn test_headers() {
        let resp = ApiResponse::ok(Value::Null)
            .with_header("X-Request-Id", "abc")
            .with_header("Content-Type", "application/problem+json");
        assert_eq!(resp.header("x-request-id"), Some("abc"));
        assert_eq!(resp.content_type, "application/problem+json");
    }

    #[test]
    fn test_into_hyper() {
        let resp = ApiResponse::created(json!([])).with_header("x-request-id", "r1");
        let hyper_resp = resp.into_hyper();
        assert_eq!(hyper_resp.status(), StatusCode::CREATED);
        assert_eq!(hyper_resp.headers().get("x-request-id").unwrap(), "r1");
    }

    #[test]
    fn test_envelope_message() {
        let envelope = Envelope::ok(json!(1)).with_message("done");
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(text.contains("\"message\":\"done\""));
        assert!(!text.contains("errorCode"));
    }
}
