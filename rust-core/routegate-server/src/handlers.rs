//! Business handlers shipped with the gateway binary.
//!
//! Storage-backed handlers run named queries through a [`QueryExecutor`];
//! without a configured database they fail, and the pipeline answers with a
//! generic 500.

use routegate_core::error::{Error, Result};
use routegate_core::handler::{ApiRequest, HandlerCatalog};
use routegate_core::response::ApiResponse;
use routegate_core::storage::QueryExecutor;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Shared storage handle
pub type Db = Arc<dyn QueryExecutor>;

/// Build the catalog of every handler the binary provides
pub fn catalog(db: Option<Db>) -> HandlerCatalog {
    let mut catalog = HandlerCatalog::new();
    with_storage(&mut catalog, "users.list", db.clone(), list_users);
    with_storage(&mut catalog, "users.create", db.clone(), create_user);
    with_storage(&mut catalog, "merchants.list", db.clone(), list_merchants);
    with_storage(&mut catalog, "merchants.create", db.clone(), create_merchant);
    with_storage(&mut catalog, "merchants.check", db, check_merchant);
    catalog.register("payments.create", |req| payment_event("payments-created", req));
    catalog.register("payments.refund", |req| payment_event("payments-refund", req));
    catalog.register("system.echo", echo);
    catalog
}

fn with_storage<F, Fut>(catalog: &mut HandlerCatalog, id: &'static str, db: Option<Db>, handler: F)
where
    F: Fn(Db, ApiRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiResponse>> + Send + 'static,
{
    catalog.register(id, move |req| {
        let call = db.clone().map(|db| handler(db, req));
        async move {
            match call {
                Some(call) => call.await,
                None => Err(Error::handler(id, "storage is not configured")),
            }
        }
    });
}

/// String field from the body, or `default` when absent
fn body_text(req: &ApiRequest, name: &str, default: &str) -> Value {
    let text = match &req.body {
        Some(Value::Object(body)) => body.get(name).and_then(Value::as_str),
        _ => None,
    };
    Value::String(text.unwrap_or(default).to_string())
}

fn params<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

async fn list_users(db: Db, req: ApiRequest) -> Result<ApiResponse> {
    let status = req
        .query
        .get("status")
        .filter(|s| !s.trim().is_empty())
        .map_or("active", String::as_str);
    let rows = db
        .execute("users", "GetActiveUsers", &params([("status", json!(status))]))
        .await?;
    Ok(ApiResponse::ok(json!(rows)))
}

async fn create_user(db: Db, req: ApiRequest) -> Result<ApiResponse> {
    let rows = db
        .execute(
            "users",
            "CreateUser",
            &params([
                ("username", body_text(&req, "username", "")),
                ("email", body_text(&req, "email", "")),
                ("status", body_text(&req, "status", "active")),
            ]),
        )
        .await?;
    Ok(ApiResponse::created(json!(rows)))
}

async fn list_merchants(db: Db, _req: ApiRequest) -> Result<ApiResponse> {
    let rows = db.execute("merchants", "GetMerchants", &Map::new()).await?;
    Ok(ApiResponse::ok(json!(rows)))
}

async fn create_merchant(db: Db, req: ApiRequest) -> Result<ApiResponse> {
    let rows = db
        .execute(
            "merchants",
            "CreateMerchant",
            &params([
                ("name", body_text(&req, "name", "")),
                ("email", body_text(&req, "email", "")),
            ]),
        )
        .await?;
    Ok(ApiResponse::created(json!(rows)))
}

async fn check_merchant(db: Db, req: ApiRequest) -> Result<ApiResponse> {
    let name = req.text("merchant_name").unwrap_or_default();
    let rows = db
        .execute("merchants", "CheckMerchant", &params([("merchant_name", json!(name))]))
        .await?;
    Ok(ApiResponse::ok(json!({
        "merchant_name": name,
        "is_merchant": !rows.is_empty(),
    })))
}

async fn payment_event(topic: &'static str, req: ApiRequest) -> Result<ApiResponse> {
    info!(
        topic,
        request_id = %req.request_id,
        fields = req.body.as_ref().and_then(serde_json::Value::as_object).map_or(0, Map::len),
        "Payment event accepted"
    );
    Ok(ApiResponse::ok(json!({"message": "Success operation"})))
}

async fn echo(req: ApiRequest) -> Result<ApiResponse> {
    Ok(ApiResponse::ok(json!({
        "path": req.path,
        "method": req.method,
        "query": req.query,
        "body": req.body,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use routegate_core::dispatch::DispatchKey;
    use routegate_core::storage::DbRow;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records calls and answers with canned rows
    #[derive(Default)]
    struct MockDb {
        calls: Mutex<Vec<(String, String, Map<String, Value>)>>,
        rows: Vec<DbRow>,
    }

    #[async_trait]
    impl QueryExecutor for MockDb {
        async fn execute(&self, entity: &str, query: &str, params: &Map<String, Value>) -> Result<Vec<DbRow>> {
            self.calls
                .lock()
                .unwrap()
                .push((entity.to_string(), query.to_string(), params.clone()));
            Ok(self.rows.clone())
        }
    }

    fn request(query: &[(&str, &str)], body: Option<Value>) -> ApiRequest {
        ApiRequest {
            key: DispatchKey::new("/api/test", "POST"),
            path: "/api/test".to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body,
            claims: None,
            request_id: "r-1".to_string(),
        }
    }

    fn row(value: Value) -> DbRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_catalog_identifiers() {
        let catalog = catalog(None);
        assert_eq!(
            catalog.identifiers(),
            vec![
                "merchants.check",
                "merchants.create",
                "merchants.list",
                "payments.create",
                "payments.refund",
                "system.echo",
                "users.create",
                "users.list",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_users_defaults_status() {
        let db = Arc::new(MockDb {
            rows: vec![row(json!({"id": 1, "username": "alice"}))],
            ..MockDb::default()
        });
        let resp = list_users(db.clone(), request(&[], None)).await.unwrap();
        assert_eq!(resp.json().unwrap()["data"][0]["username"], "alice");

        list_users(db.clone(), request(&[("status", "blocked")], None)).await.unwrap();
        let calls = db.calls.lock().unwrap();
        assert_eq!(calls[0].1, "GetActiveUsers");
        assert_eq!(calls[0].2["status"], "active");
        assert_eq!(calls[1].2["status"], "blocked");
    }

    #[tokio::test]
    async fn test_create_user_params() {
        let db = Arc::new(MockDb::default());
        let resp = create_user(db.clone(), request(&[], Some(json!({"username": "bob", "email": "b@x.io"}))))
            .await
            .unwrap();
        assert_eq!(resp.status, 201);

        let calls = db.calls.lock().unwrap();
        assert_eq!(calls[0].0, "users");
        assert_eq!(calls[0].2["username"], "bob");
        assert_eq!(calls[0].2["status"], "active");
    }

    #[tokio::test]
    async fn test_check_merchant() {
        let db = Arc::new(MockDb {
            rows: vec![row(json!({"id": 3}))],
            ..MockDb::default()
        });
        let resp = check_merchant(db.clone(), request(&[("merchant_name", "acme")], None))
            .await
            .unwrap();
        let body = resp.json().unwrap();
        assert_eq!(body["data"]["merchant_name"], "acme");
        assert_eq!(body["data"]["is_merchant"], true);
    }

    #[tokio::test]
    async fn test_storage_handlers_fail_without_db() {
        let handler = catalog(None).get("users.list").unwrap();
        let result = handler(request(&[], None)).await;
        assert!(matches!(result, Err(Error::Handler { .. })));
    }

    #[tokio::test]
    async fn test_payment_and_echo() {
        let catalog = catalog(None);
        let refund = catalog.get("payments.refund").unwrap();
        let resp = refund(request(&[], Some(json!({"amount": "1.00"})))).await.unwrap();
        assert_eq!(resp.json().unwrap()["data"]["message"], "Success operation");

        let echo = catalog.get("system.echo").unwrap();
        let resp = echo(request(&[("q", "1")], Some(json!({"a": 1})))).await.unwrap();
        let body = resp.json().unwrap();
        assert_eq!(body["data"]["query"]["q"], "1");
        assert_eq!(body["data"]["body"]["a"], 1);
    }
}
