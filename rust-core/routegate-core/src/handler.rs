//! # Handlers
//!
//! Business handlers are plain async functions registered under a string
//! identifier in a [`HandlerCatalog`]. Route tables refer to them by that
//! identifier only; the catalog is fixed before any route table is loaded.

use crate::dispatch::DispatchKey;
use crate::error::Result;
use crate::response::ApiResponse;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a handler sees of the request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Dispatch key the request resolved to
    pub key: DispatchKey,
    /// Lower-case path
    pub path: String,
    /// Upper-case method
    pub method: String,
    /// Request headers (lower-case names)
    pub headers: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Parsed JSON body, absent when the request carried none
    pub body: Option<Value>,
    /// Verified JWT claims, for `jwt` routes
    pub claims: Option<Value>,
    /// Request id, also returned in `x-request-id`
    pub request_id: String,
}

impl ApiRequest {
    /// Query parameters and top-level body fields merged into one object
    ///
    /// Body fields win over query parameters with the same name.
    #[must_use]
    pub fn data(&self) -> Map<String, Value> {
        let mut data: Map<String, Value> = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if let Some(Value::Object(body)) = &self.body {
            for (k, v) in body {
                data.insert(k.clone(), v.clone());
            }
        }
        data
    }

    /// A field from [`Self::data`] rendered as text
    ///
    /// Strings come back unquoted, other scalars in their JSON form; null
    /// and absent fields are `None`.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        let from_body = match &self.body {
            Some(Value::Object(body)) => body.get(name),
            _ => None,
        };
        match from_body {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) => None,
            Some(other) => Some(other.to_string()),
            None => self.query.get(name).cloned(),
        }
    }
}

/// Future returned by a handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send>>;

/// Handler function type (async)
pub type Handler = Arc<dyn Fn(ApiRequest) -> HandlerFuture + Send + Sync>;

/// Identifier to handler table
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

impl HandlerCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async function under an identifier
    ///
    /// Registering the same identifier again replaces the earlier handler.
    pub fn register<F, Fut>(&mut self, identifier: impl Into<String>, handler: F)
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |req| Box::pin(handler(req)));
        self.handlers.insert(identifier.into(), handler);
    }

    /// Builder form of [`Self::register`]
    #[must_use]
    pub fn with<F, Fut>(mut self, identifier: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse>> + Send + 'static,
    {
        self.register(identifier, handler);
        self
    }

    /// Whether an identifier is known
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.handlers.contains_key(identifier)
    }

    /// Look up a handler
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Handler> {
        self.handlers.get(identifier).cloned()
    }

    /// Registered identifiers, sorted
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(query: &[(&str, &str)], body: Option<Value>) -> ApiRequest {
        ApiRequest {
            key: DispatchKey::new("/api/users", "GET"),
            path: "/api/users".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body,
            claims: None,
            request_id: "test".to_string(),
        }
    }

    #[test]
    fn test_data_merges_body_over_query() {
        let req = request(&[("status", "active"), ("page", "2")], Some(json!({"status": "blocked"})));
        let data = req.data();
        assert_eq!(data["status"], "blocked");
        assert_eq!(data["page"], "2");
    }

    #[test]
    fn test_text() {
        let req = request(&[("status", "active")], Some(json!({"limit": 5, "note": null})));
        assert_eq!(req.text("status").as_deref(), Some("active"));
        assert_eq!(req.text("limit").as_deref(), Some("5"));
        assert_eq!(req.text("note"), None);
        assert_eq!(req.text("missing"), None);
    }

    #[tokio::test]
    async fn test_catalog_register_and_call() {
        let catalog = HandlerCatalog::new()
            .with("system.echo", |req: ApiRequest| async move {
                Ok(ApiResponse::ok(req.body.unwrap_or(Value::Null)))
            });

        assert!(catalog.contains("system.echo"));
        assert!(!catalog.contains("system.other"));
        assert_eq!(catalog.identifiers(), vec!["system.echo"]);

        let handler = catalog.get("system.echo").unwrap();
        let resp = handler(request(&[], Some(json!({"a": 1})))).await.unwrap();
        assert_eq!(resp.json().unwrap()["data"]["a"], 1);
    }

    #[test]
    fn test_catalog_handler_results_pass_through() {
        let catalog = HandlerCatalog::new()
            .with("users.list", |_req| async { Ok(ApiResponse::ok(json!([]))) })
            .with("users.create", |_req| async {
                Err(crate::error::Error::handler("users.create", "pool closed"))
            });

        let list = catalog.get("users.list").unwrap();
        let resp = tokio_test::assert_ok!(tokio_test::block_on(list(request(&[], None))));
        assert_eq!(resp.status, 200);

        let create = catalog.get("users.create").unwrap();
        let err = tokio_test::assert_err!(tokio_test::block_on(create(request(&[], None))));
        assert!(err.to_string().contains("pool closed"));
        assert_eq!(catalog.len(), 2);
    }
}
