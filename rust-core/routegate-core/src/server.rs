//! # HTTP Server
//!
//! Hyper/Tokio listener in front of the [`Gateway`] pipeline.
//!
//! ## Request pipeline
//!
//! 1. dispatch key from path and method
//! 2. route lookup in the current table snapshot (404)
//! 3. auth enforcement for the route's declared scheme (401/501)
//! 4. JSON body parsing (400 `invalid_json`)
//! 5. fail-fast schema validation (400 `validation_failed`)
//! 6. handler, run on its own task so a panic becomes a 500
//!
//! Every path through the pipeline ends in an enveloped response that
//! carries `x-request-id`.

use crate::auth::Authenticator;
use crate::configurator::Configurator;
use crate::error::{Error, Result};
use crate::handler::ApiRequest;
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareResult};
use crate::request::GatewayRequest;
use crate::response::{codes, ApiResponse};
use crate::settings::ServerSettings;
use crate::validation;
use http_body_util::Full;
pub use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Build from the `server` settings section
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid listen address.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        Ok(Self {
            address: settings.socket_addr()?,
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
            max_body_size: settings.max_body_size,
        })
    }
}

/// The per-request pipeline, independent of any socket
#[derive(Debug, Clone)]
pub struct Gateway {
    configurator: Arc<Configurator>,
    authenticator: Arc<Authenticator>,
    middleware: Arc<MiddlewareChain>,
}

impl Gateway {
    /// Create a gateway over a configurator and an authenticator
    #[must_use]
    pub fn new(configurator: Arc<Configurator>, authenticator: Authenticator) -> Self {
        Self {
            configurator,
            authenticator: Arc::new(authenticator),
            middleware: Arc::new(MiddlewareChain::new()),
        }
    }

    /// Add a middleware to the chain
    #[must_use]
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        Arc::make_mut(&mut self.middleware).add(middleware);
        self
    }

    /// Route table owner
    #[must_use]
    pub fn configurator(&self) -> &Arc<Configurator> {
        &self.configurator
    }

    /// Run one request through the pipeline
    pub async fn process(&self, mut req: GatewayRequest) -> ApiResponse {
        let request_id = match req.header("x-request-id") {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => {
                let id = generate_request_id();
                req.set_header("x-request-id", &id);
                id
            }
        };

        let mut response = match self.middleware.run_before(&req) {
            MiddlewareResult::Continue => self.dispatch(&req, &request_id).await,
            MiddlewareResult::Respond(resp) => resp,
        };

        response.set_header("x-request-id", &request_id);
        self.middleware.run_after(&req, &mut response);
        response
    }

    async fn dispatch(&self, req: &GatewayRequest, request_id: &str) -> ApiResponse {
        let key = req.key();
        let table = self.configurator.snapshot();

        let Some(route) = table.resolve(&key) else {
            info!(key = %key, request_id, "No handler registered for route");
            return ApiResponse::error(404, codes::HANDLER_NOT_FOUND, "Handler not found", Value::Null);
        };
        let handler_id = route.handler.to_string();

        let parsed = req.json_body();
        let body_for_auth = parsed.as_ref().ok().and_then(Option::as_ref);

        let claims = match self.authenticator.enforce(route.auth, req, body_for_auth).await {
            Ok(claims) => claims,
            Err(failure) => {
                if failure.is_operator_error() {
                    error!(key = %key, request_id, auth = %route.auth, code = failure.error_code(), reason = %failure, "Authentication could not be performed");
                } else {
                    warn!(key = %key, request_id, auth = %route.auth, code = failure.error_code(), reason = %failure, "Authentication failed");
                }
                return ApiResponse::error(
                    failure.status(),
                    failure.error_code(),
                    failure.public_message(),
                    Value::Null,
                );
            }
        };

        let body = match parsed {
            Ok(body) => body,
            Err(e) => {
                warn!(key = %key, request_id, error = %e, "Request body is not valid JSON");
                return ApiResponse::error(400, codes::INVALID_JSON, "Request body is not valid JSON", Value::Null);
            }
        };

        let errors = validation::validate(body.as_ref(), route.schema);
        if let Some(first) = errors.first() {
            warn!(key = %key, request_id, errors = ?errors.codes(), field = %first.field, "Request validation failed");
            let data = serde_json::to_value(first).unwrap_or(Value::Null);
            return ApiResponse::error(400, codes::VALIDATION_FAILED, &first.message, data);
        }

        let Some(handler) = self.configurator.catalog().get(&handler_id) else {
            error!(key = %key, handler = %handler_id, request_id, "Route refers to a handler missing from the catalog");
            return ApiResponse::internal_error();
        };

        let api_request = ApiRequest {
            key: key.clone(),
            path: req.path.to_lowercase(),
            method: req.method.clone(),
            headers: req.headers_map(),
            query: req.query_map().clone(),
            body,
            claims,
            request_id: request_id.to_string(),
        };

        match tokio::spawn(handler(api_request)).await {
            Ok(Ok(response)) => {
                debug!(key = %key, handler = %handler_id, status = response.status, "Handler completed");
                response
            }
            Ok(Err(e)) => {
                error!(key = %key, handler = %handler_id, request_id, error = %e, "Handler failed");
                ApiResponse::internal_error()
            }
            Err(join) => {
                error!(key = %key, handler = %handler_id, request_id, error = %join, "Handler task panicked");
                ApiResponse::internal_error()
            }
        }
    }
}

/// HTTP server running a [`Gateway`]
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    gateway: Gateway,
}

impl Server {
    /// Create a new Server instance
    #[must_use]
    pub const fn new(config: ServerConfig, gateway: Gateway) -> Self {
        Self { config, gateway }
    }

    /// Bind the server to an address
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Pipeline served by this server
    #[must_use]
    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Start the server, stopping on Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` when the address cannot be bound and
    /// `Error::Io` when accepting fails.
    pub async fn serve(&self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Start the server, stopping when `signal` completes
    ///
    /// In-flight connections get `shutdown_timeout` to finish.
    ///
    /// # Errors
    ///
    /// See [`Self::serve`].
    pub async fn serve_with_shutdown<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.config.address;
        let bind_error = |source| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(1024).map_err(bind_error)?;

        info!(address = %addr, "Server listening on http://{}", addr);

        let gateway = self.gateway.clone();
        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let gateway = gateway.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        let service = service_fn(move |req| {
                            let gateway = gateway.clone();
                            async move {
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let version = format!("{:?}", req.version());

                                let resp = handle_request(req, &gateway, remote_addr, max_body_size).await;
                                info!("    {} - \"{} {} {}\" {}", remote_addr, method, path, version, resp.status());
                                Ok::<_, hyper::Error>(resp)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut signal => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(
        &self,
        method: &str,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> ApiResponse {
        if let Some(b) = body.as_ref() {
            if b.len() > self.config.max_body_size {
                return payload_too_large(self.config.max_body_size);
            }
        }
        let mut req = GatewayRequest::new(method, path, headers, body);
        req.set_header("x-client-ip", "test");
        self.gateway.process(req).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler; shutdown only by process exit");
        std::future::pending::<()>().await;
    }
}

fn payload_too_large(limit: usize) -> ApiResponse {
    ApiResponse::error(
        413,
        codes::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds {limit} bytes"),
        Value::Null,
    )
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    gateway: &Gateway,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> Response<Full<Bytes>> {
    let mut request = match GatewayRequest::from_hyper_with_limit(req, max_body_size).await {
        Ok(r) => r,
        Err(Error::PayloadTooLarge { limit, actual }) => {
            warn!(%remote_addr, limit, actual, "Request body too large");
            return payload_too_large(limit)
                .with_header("x-request-id", &generate_request_id())
                .into_hyper();
        }
        Err(e) => {
            error!(%remote_addr, error = %e, "Failed to read request");
            return ApiResponse::error(400, codes::BAD_REQUEST, "Bad Request", Value::Null)
                .with_header("x-request-id", &generate_request_id())
                .into_hyper();
        }
    };

    request.set_header("x-client-ip", &remote_addr.ip().to_string());
    gateway.process(request).await.into_hyper()
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_keys::{now, sign, PUBLIC_PEM};
    use crate::auth::{JwtVerifier, StaticTokens};
    use crate::handler::HandlerCatalog;
    use jsonwebtoken::Algorithm;
    use serde_json::json;

    const ROUTES: &str = r#"{
        "apiRoutes": [
            {"path": "/api/echo", "method": "POST", "auth": "none", "handler": "system.echo",
             "requestSchema": {"fields": [
                {"name": "name", "type": "string", "required": true, "maxLength": 10},
                {"name": "card", "type": "card_number"}
             ]}},
            {"path": "/api/payments", "method": "POST", "auth": "jwt", "handler": "system.echo"},
            {"path": "/api/partners", "method": "GET", "auth": "static_tokens", "handler": "system.echo"},
            {"path": "/api/oauth", "method": "GET", "auth": "oauth2", "handler": "system.echo"},
            {"path": "/api/fail", "method": "GET", "auth": "none", "handler": "system.fail"},
            {"path": "/api/panic", "method": "GET", "auth": "none", "handler": "system.panic"}
        ]
    }"#;

    fn catalog() -> HandlerCatalog {
        HandlerCatalog::new()
            .with("system.echo", |req: ApiRequest| async move {
                Ok(ApiResponse::ok(json!({
                    "body": req.body,
                    "claims": req.claims,
                    "requestId": req.request_id,
                })))
            })
            .with("system.fail", |_req| async {
                Err(Error::handler("system.fail", "connection refused by db-01"))
            })
            .with("system.panic", |_req| async {
                let items: Vec<u8> = Vec::new();
                Ok(ApiResponse::ok(json!(items[3])))
            })
    }

    fn gateway() -> Gateway {
        let configurator = Arc::new(Configurator::new(catalog()));
        let report = configurator.configure_from_str("routes", ROUTES).unwrap();
        assert_eq!(report.accepted, 6);

        let authenticator = Authenticator::default()
            .with_jwt(JwtVerifier::from_pem(PUBLIC_PEM, &[Algorithm::RS256], 60).unwrap())
            .with_static_tokens(StaticTokens::new(["partner-secret"]));
        Gateway::new(configurator, authenticator)
    }

    fn request(method: &str, path: &str, headers: &[(&str, &str)], body: Option<&str>) -> GatewayRequest {
        let headers = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayRequest::new(method, path, headers, body.map(|b| Bytes::from(b.to_string())))
    }

    async fn send(req: GatewayRequest) -> (u16, Value) {
        let resp = gateway().process(req).await;
        let body = resp.json().unwrap();
        (resp.status, body)
    }

    #[tokio::test]
    async fn test_dispatch_miss_is_404() {
        let (status, body) = send(request("GET", "/api/nothing", &[], None)).await;
        assert_eq!(status, 404);
        assert_eq!(body["errorCode"], "handler_not_found");

        let (status, _) = send(request("DELETE", "/api/echo", &[], None)).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_dispatch_is_case_insensitive() {
        let (status, body) = send(request("post", "/API/Echo", &[], Some(r#"{"name": "ann"}"#))).await;
        assert_eq!(status, 200);
        assert_eq!(body["result"], "ok");
        assert_eq!(body["data"]["body"]["name"], "ann");
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let (status, body) = send(request("POST", "/api/echo", &[], Some(r#"{"card": "4532015112830367"}"#))).await;
        assert_eq!(status, 400);
        assert_eq!(body["errorCode"], "validation_failed");
        assert_eq!(body["data"]["code"], "missing_field");
        assert_eq!(body["data"]["field"], "name");

        let (status, body) = send(request(
            "POST",
            "/api/echo",
            &[],
            Some(r#"{"name": "ann", "card": "4532015112830367"}"#),
        ))
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["data"]["code"], "invalid_card_number");

        let (status, _) = send(request(
            "POST",
            "/api/echo",
            &[],
            Some(r#"{"name": "ann", "card": "4532015112830366"}"#),
        ))
        .await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (status, body) = send(request("POST", "/api/echo", &[], Some("{name:"))).await;
        assert_eq!(status, 400);
        assert_eq!(body["errorCode"], "invalid_json");
    }

    #[tokio::test]
    async fn test_unsupported_auth_is_501() {
        let (status, body) = send(request("GET", "/api/oauth", &[], None)).await;
        assert_eq!(status, 501);
        assert_eq!(body["errorCode"], "selected_auth_not_supported");

        let (status, _) = send(request("GET", "/api/oauth", &[("authorization", "Bearer anything")], None)).await;
        assert_eq!(status, 501);
    }

    #[tokio::test]
    async fn test_jwt_round_trip() {
        let token = sign(&json!({"timestamp": now(), "iat": now()}));
        let auth = format!("Bearer {token}");

        let (status, body) = send(request("POST", "/api/payments", &[("authorization", &auth)], Some("{}"))).await;
        assert_eq!(status, 200);
        assert!(body["data"]["claims"]["timestamp"].is_number());

        let (status, body) = send(request("POST", "/api/payments", &[], Some("{}"))).await;
        assert_eq!(status, 401);
        assert_eq!(body["errorCode"], "missing_jwt_token");
    }

    #[tokio::test]
    async fn test_jwt_claim_body_binding() {
        let token = sign(&json!({"timestamp": now(), "amount": "10.00", "currency": "TRY"}));
        let auth = format!("Bearer {token}");

        let (status, _) = send(request(
            "POST",
            "/api/payments",
            &[("authorization", &auth)],
            Some(r#"{"amount": "10.00", "currency": "TRY"}"#),
        ))
        .await;
        assert_eq!(status, 200);

        let (status, body) = send(request(
            "POST",
            "/api/payments",
            &[("authorization", &auth)],
            Some(r#"{"amount": "99.00", "currency": "TRY"}"#),
        ))
        .await;
        assert_eq!(status, 401);
        assert_eq!(body["errorCode"], "invalid_jwt_token");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let (status, body) = send(request("GET", "/api/partners", &[], None)).await;
        assert_eq!(status, 401);
        assert_eq!(body["errorCode"], "missing_static_token");

        let (status, body) = send(request("GET", "/api/partners", &[("authorization", "Static nope")], None)).await;
        assert_eq!(status, 401);
        assert_eq!(body["errorCode"], "invalid_static_token");

        let (status, _) = send(request("GET", "/api/partners", &[("authorization", "static partner-secret")], None)).await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn test_handler_failure_hides_detail() {
        let (status, body) = send(request("GET", "/api/fail", &[], None)).await;
        assert_eq!(status, 500);
        assert_eq!(body["errorCode"], "internal_server_error");
        assert!(!body.to_string().contains("db-01"));

        let (status, _) = send(request("GET", "/api/panic", &[], None)).await;
        assert_eq!(status, 500);
    }

    #[tokio::test]
    async fn test_request_id() {
        let resp = gateway()
            .process(request("GET", "/api/nothing", &[("x-request-id", "req-42")], None))
            .await;
        assert_eq!(resp.header("x-request-id"), Some("req-42"));

        let resp = gateway().process(request("POST", "/api/echo", &[], Some(r#"{"name": "a"}"#))).await;
        let id = resp.header("x-request-id").unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(resp.json().unwrap()["data"]["requestId"], id);
    }

    #[tokio::test]
    async fn test_middleware_short_circuit() {
        struct Closed;
        impl Middleware for Closed {
            fn before_request(&self, _req: &GatewayRequest) -> MiddlewareResult {
                MiddlewareResult::Respond(ApiResponse::error(503, "closed", "Closed", Value::Null))
            }
        }

        let resp = gateway()
            .with_middleware(Closed)
            .process(request("POST", "/api/echo", &[], Some(r#"{"name": "a"}"#)))
            .await;
        assert_eq!(resp.status, 503);
        assert!(resp.header("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_test_request_body_limit() {
        let mut server = Server::new(ServerConfig::default(), gateway());
        server.set_max_body_size(8);

        let resp = server
            .test_request("POST", "/api/echo", HashMap::new(), Some(Bytes::from_static(b"{\"name\": \"abcdef\"}")))
            .await;
        assert_eq!(resp.status, 413);
        assert_eq!(resp.json().unwrap()["errorCode"], "payload_too_large");
    }

    #[tokio::test]
    async fn test_table_swap_is_seen_by_next_request() {
        let gw = gateway();
        gw.configurator()
            .configure_from_str(
                "routes",
                r#"{"apiRoutes": [{"path": "/api/v2", "method": "GET", "auth": "none", "handler": "system.echo"}]}"#,
            )
            .unwrap();

        assert_eq!(gw.process(request("GET", "/api/v2", &[], None)).await.status, 200);
        assert_eq!(gw.process(request("POST", "/api/echo", &[], Some("{}"))).await.status, 404);
    }

    #[tokio::test]
    async fn test_serve_with_shutdown() {
        let server = Server::new(ServerConfig::default(), gateway()).bind(([127, 0, 0, 1], 0).into());
        let result = server.serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);

        let config = ServerConfig::from_settings(&ServerSettings {
            address: "0.0.0.0:9000".to_string(),
            max_body_size: 10,
            shutdown_timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(config.address.port(), 9000);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }
}
