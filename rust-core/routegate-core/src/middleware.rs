//! # Request Middleware
//!
//! Request/response interception around the gateway pipeline.
//!
//! Middlewares run in registration order before dispatch and in reverse order
//! after the response is produced. A `before_request` hook may short-circuit
//! with its own response; the pipeline then skips routing entirely.

use crate::request::GatewayRequest;
use crate::response::ApiResponse;
use std::sync::Arc;
use tracing::{debug, info};

/// Header names never written to logs
const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// Middleware trait for request/response interception
pub trait Middleware: Send + Sync {
    /// Called before the request is dispatched
    fn before_request(&self, _req: &GatewayRequest) -> MiddlewareResult {
        MiddlewareResult::Continue
    }

    /// Called after the response is produced
    fn after_response(&self, _req: &GatewayRequest, _res: &mut ApiResponse) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of middleware execution
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/dispatch
    Continue,
    /// Short-circuit with this response
    Respond(ApiResponse),
}

/// Ordered list of middlewares
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareChain").field("middlewares", &names).finish()
    }
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Execute `before_request` for all middlewares
    #[must_use]
    pub fn run_before(&self, req: &GatewayRequest) -> MiddlewareResult {
        for mw in &self.middlewares {
            if let MiddlewareResult::Respond(res) = mw.before_request(req) {
                debug!(middleware = mw.name(), "Request short-circuited");
                return MiddlewareResult::Respond(res);
            }
        }
        MiddlewareResult::Continue
    }

    /// Execute `after_response` for all middlewares (in reverse order)
    pub fn run_after(&self, req: &GatewayRequest, res: &mut ApiResponse) {
        for mw in self.middlewares.iter().rev() {
            mw.after_response(req, res);
        }
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Structured request/response logging
#[derive(Debug, Default)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log request headers, with credentials redacted
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

fn loggable_headers(req: &GatewayRequest) -> String {
    let mut headers: Vec<String> = req
        .headers_map()
        .into_iter()
        .map(|(k, v)| {
            if REDACTED_HEADERS.contains(&k.as_str()) {
                format!("{k}=<redacted>")
            } else {
                format!("{k}={v}")
            }
        })
        .collect();
    headers.sort_unstable();
    headers.join(", ")
}

/// `errorCode` of an error envelope, for failed responses only
fn error_code(res: &ApiResponse) -> Option<String> {
    if res.status < 400 {
        return None;
    }
    let body = res.json().ok()?;
    body.get("errorCode")?.as_str().map(str::to_string)
}

impl Middleware for LoggingMiddleware {
    fn before_request(&self, req: &GatewayRequest) -> MiddlewareResult {
        let key = req.key();
        let client = req.header("x-client-ip").unwrap_or("-");
        let request_id = req.header("x-request-id").unwrap_or("-");
        if self.log_headers {
            info!(%key, client, request_id, headers = %loggable_headers(req), "Request received");
        } else {
            info!(%key, client, request_id, "Request received");
        }
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &GatewayRequest, res: &mut ApiResponse) {
        let key = req.key();
        let request_id = req.header("x-request-id").unwrap_or("-");
        match error_code(res) {
            Some(code) => info!(%key, status = res.status, code = %code, request_id, "Request rejected"),
            None => info!(%key, status = res.status, request_id, "Request served"),
        }
    }

    fn name(&self) -> &'static str {
        "request-log"
    }
}
