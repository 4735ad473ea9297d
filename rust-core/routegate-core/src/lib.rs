//! # routegate Core
//!
//! Core runtime library for the routegate request gateway.
//!
//! A route table, loaded from configuration, maps each `path:METHOD`
//! dispatch key to a handler identifier, an auth scheme and an optional
//! request-body schema. Every request passes the same pipeline: dispatch,
//! auth, JSON parsing, schema validation, handler.
//!
//! ## Modules
//!
//! - `dispatch` - HTTP methods and normalized dispatch keys
//! - `route` - Route and field records as read from configuration
//! - `schema` - Field kinds and field specs
//! - `fields` - Per-kind field validators (cards, amounts, ...)
//! - `validation` - Validation errors and the fail-fast schema walker
//! - `registry` - Dispatch key to handler identifier map
//! - `configurator` - Route table loading, validation and atomic reload
//! - `auth` - JWT, static token and unsupported-scheme enforcement
//! - `handler` - Handler catalog and the request view handlers receive
//! - `request` - HTTP request wrapper with headers and query parsing
//! - `response` - Response envelope
//! - `middleware` - Request/response middleware system
//! - `server` - HTTP server and the request pipeline, built on Hyper
//! - `storage` - Named SQL queries over SQLx pools (SQLite, PostgreSQL)
//! - `settings` - Process settings file
//! - `json` - Configuration parsing with simd-json
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod configurator;
pub mod dispatch;
pub mod error;
pub mod fields;
pub mod handler;
pub mod json;
pub mod middleware;
pub mod registry;
pub mod request;
pub mod response;
pub mod route;
pub mod schema;
pub mod server;
pub mod settings;
pub mod storage;
pub mod validation;

pub use auth::{AuthFailure, Authenticator, JwtVerifier, StaticTokens};
pub use configurator::{Configurator, LoadReport, RouteIssue, RouteRejection, RouteTable};
pub use dispatch::{DispatchKey, Method};
pub use error::{Error, Result};
pub use handler::{ApiRequest, Handler, HandlerCatalog};
pub use json::{parse_json, to_json};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareResult};
pub use registry::HandlerRegistry;
pub use request::GatewayRequest;
pub use response::{ApiResponse, Envelope};
pub use route::{AuthType, RouteFile};
pub use schema::{FieldKind, FieldSpec, Schema};
pub use server::{Gateway, Server, ServerConfig};
pub use settings::GatewaySettings;
pub use storage::{DatabasePool, DbRow, QueryCatalog, QueryExecutor, Storage};
pub use validation::{ValidationCode, ValidationError, ValidationErrors, ValidationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
