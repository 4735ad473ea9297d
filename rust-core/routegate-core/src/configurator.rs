//! # Route Table Configurator
//!
//! Turns raw route records into an immutable [`RouteTable`] and publishes it
//! through an `ArcSwap`, so request tasks always see one complete table.
//!
//! Validation here is exhaustive: every problem with a route is collected
//! before the route is rejected, so an operator can fix a routes file in one
//! pass. Rejected routes are skipped; the table is ready as long as at least
//! one route was accepted.

use crate::dispatch::{DispatchKey, Method};
use crate::error::{Error, Result};
use crate::handler::HandlerCatalog;
use crate::json;
use crate::registry::HandlerRegistry;
use crate::route::{AuthType, RawField, RawRoute, RouteDefinition, RouteFile};
use crate::schema::{number_to_decimal, parse_decimal, FieldKind, FieldPattern, FieldSpec, Schema};
use arc_swap::ArcSwap;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// One problem found in a route record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteIssue {
    /// Record does not have the expected shape
    #[error("route record is malformed: {0}")]
    Malformed(String),
    /// `path` missing or blank
    #[error("'path' is required and cannot be empty")]
    MissingPath,
    /// `method` missing or blank
    #[error("'method' is required and cannot be empty")]
    MissingMethod,
    /// `method` not one of the supported verbs
    #[error("'method' must be one of: GET, POST, PUT, PATCH, DELETE. Got: '{0}'")]
    InvalidMethod(String),
    /// `auth` missing or blank
    #[error("'auth' is required and cannot be empty")]
    MissingAuth,
    /// `auth` is not a known scheme
    #[error("'auth' must be one of: none, jwt, static_tokens. Got: '{0}'")]
    InvalidAuth(String),
    /// `handler` missing or blank
    #[error("'handler' is required and cannot be empty")]
    MissingHandler,
    /// `handler` is not in the handler catalog
    #[error("handler not found: '{0}'")]
    UnknownHandler(String),
    /// Field key holding the wrong type
    #[error("{field}: {reason}")]
    InvalidFieldKey {
        /// Field label
        field: String,
        /// Key and parser message
        reason: String,
    },
    /// Field without a name
    #[error("{field}: 'name' is required and cannot be empty")]
    MissingFieldName {
        /// Field label
        field: String,
    },
    /// Field without a type
    #[error("{field}: 'type' is required and cannot be empty")]
    MissingFieldType {
        /// Field label
        field: String,
    },
    /// Field type is not a supported kind
    #[error("{field}: 'type' must be one of supported types. Got: '{type_name}'")]
    UnsupportedFieldType {
        /// Field label
        field: String,
        /// Type as written
        type_name: String,
    },
    /// `min`/`max` is not numeric
    #[error("{field}: '{bound}' must be a number. Got: {value}")]
    InvalidBound {
        /// Field label
        field: String,
        /// `min` or `max`
        bound: &'static str,
        /// Value as written
        value: String,
    },
    /// `min` greater than `max`
    #[error("{field}: 'min' ({min}) cannot be greater than 'max' ({max})")]
    MinGreaterThanMax {
        /// Field label
        field: String,
        /// Lower bound
        min: Decimal,
        /// Upper bound
        max: Decimal,
    },
    /// Negative `maxLength`
    #[error("{field}: 'maxLength' must be a positive number. Got: {value}")]
    NegativeMaxLength {
        /// Field label
        field: String,
        /// Value as written
        value: i64,
    },
    /// `regExp` does not compile
    #[error("{field}: 'regExp' is not a valid regular expression: {reason}")]
    InvalidRegex {
        /// Field label
        field: String,
        /// Compiler message
        reason: String,
    },
    /// `allowedValues` present but empty
    #[error("{field}: 'allowedValues' is defined but empty")]
    EmptyAllowedValues {
        /// Field label
        field: String,
    },
    /// Dispatch key already taken by an earlier route
    #[error("duplicate route: {0}")]
    Duplicate(DispatchKey),
}

/// A route that was skipped, with every reason
#[derive(Debug, Clone)]
pub struct RouteRejection {
    /// Position in the routes list
    pub index: usize,
    /// Human label (`POST /api/x` or `route #3`)
    pub label: String,
    /// All problems found
    pub issues: Vec<RouteIssue>,
}

impl fmt::Display for RouteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.label)?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Outcome of one configuration pass
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Records in the routes list
    pub total: usize,
    /// Routes registered
    pub accepted: usize,
    /// Routes skipped
    pub rejected: Vec<RouteRejection>,
}

impl LoadReport {
    /// At least one route was accepted
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.accepted > 0
    }
}

/// What the pipeline needs to know about a matched route
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRoute<'a> {
    /// Handler identifier
    pub handler: &'a str,
    /// Declared auth scheme
    pub auth: AuthType,
    /// Body schema, if any
    pub schema: Option<&'a Schema>,
}

/// Immutable snapshot of the accepted routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    registry: HandlerRegistry,
    auth: HashMap<DispatchKey, AuthType>,
    schemas: HashMap<DispatchKey, Schema>,
}

impl RouteTable {
    /// Validate raw records and build a table from the accepted ones
    #[must_use]
    pub fn build(file: &RouteFile, catalog: &HandlerCatalog) -> (Self, LoadReport) {
        let mut table = Self::default();
        let mut report = LoadReport {
            total: file.routes().len(),
            ..LoadReport::default()
        };

        for (index, record) in file.routes().iter().enumerate() {
            match check_route(index, record, catalog) {
                Ok(route) => {
                    if let Err(rejection) = table.insert(index, route) {
                        report.rejected.push(rejection);
                    } else {
                        report.accepted += 1;
                    }
                }
                Err(rejection) => report.rejected.push(rejection),
            }
        }

        (table, report)
    }

    fn insert(&mut self, index: usize, route: RouteDefinition) -> std::result::Result<(), RouteRejection> {
        let label = format!("{} {}", route.method, route.path);
        if self.registry.register(route.key.clone(), route.handler.clone()).is_err() {
            return Err(RouteRejection {
                index,
                label,
                issues: vec![RouteIssue::Duplicate(route.key)],
            });
        }

        info!(
            method = %route.method,
            path = %route.path,
            handler = %route.handler,
            auth = %route.auth,
            "Route registered"
        );
        self.auth.insert(route.key.clone(), route.auth);
        if let Some(schema) = route.schema {
            self.schemas.insert(route.key, schema);
        }
        Ok(())
    }

    /// Look up everything known about a dispatch key
    #[must_use]
    pub fn resolve(&self, key: &DispatchKey) -> Option<ResolvedRoute<'_>> {
        let handler = self.registry.try_get(key)?;
        Some(ResolvedRoute {
            handler,
            auth: self.auth.get(key).copied().unwrap_or(AuthType::None),
            schema: self.schemas.get(key),
        })
    }

    /// Handler registry of this table
    #[must_use]
    pub const fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Declared auth for a key
    #[must_use]
    pub fn auth_for(&self, key: &DispatchKey) -> Option<AuthType> {
        self.auth.get(key).copied()
    }

    /// Schema for a key
    #[must_use]
    pub fn schema_for(&self, key: &DispatchKey) -> Option<&Schema> {
        self.schemas.get(key)
    }

    /// Number of accepted routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no route was accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

fn blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_route(
    index: usize,
    record: &Value,
    catalog: &HandlerCatalog,
) -> std::result::Result<RouteDefinition, RouteRejection> {
    let raw = RawRoute::from_value(record).map_err(|reason| RouteRejection {
        index,
        label: format!("route #{index}"),
        issues: vec![RouteIssue::Malformed(reason)],
    })?;

    let mut issues: Vec<RouteIssue> = raw.problems.iter().cloned().map(RouteIssue::Malformed).collect();
    let mut label = format!("route #{index}");

    let path = blank(raw.path.as_deref());
    if let Some(path) = path {
        label = format!("route '{path}'");
    } else {
        issues.push(RouteIssue::MissingPath);
    }

    let method = match blank(raw.method.as_deref()) {
        None => {
            issues.push(RouteIssue::MissingMethod);
            None
        }
        Some(m) => match m.parse::<Method>() {
            Ok(method) => {
                label = format!("{method} {}", path.unwrap_or("?"));
                Some(method)
            }
            Err(m) => {
                issues.push(RouteIssue::InvalidMethod(m));
                None
            }
        },
    };

    let auth = match blank(raw.auth.as_deref()) {
        None => {
            issues.push(RouteIssue::MissingAuth);
            None
        }
        Some(a) => {
            let auth = AuthType::from_name(a);
            if auth.is_none() {
                issues.push(RouteIssue::InvalidAuth(a.to_string()));
            }
            auth
        }
    };

    let handler = match blank(raw.handler.as_deref()) {
        None => {
            issues.push(RouteIssue::MissingHandler);
            None
        }
        Some(h) if !catalog.contains(h) => {
            issues.push(RouteIssue::UnknownHandler(h.to_string()));
            None
        }
        Some(h) => Some(h.to_string()),
    };

    let fields: Vec<FieldSpec> = raw
        .request_schema
        .as_deref()
        .map(|fields| check_fields(fields, "", &mut issues))
        .unwrap_or_default();

    match (path, method, auth, handler) {
        (Some(path), Some(method), Some(auth), Some(handler)) if issues.is_empty() => Ok(RouteDefinition {
            key: DispatchKey::for_route(path, method),
            path: path.to_string(),
            method,
            auth,
            handler,
            schema: (!fields.is_empty()).then(|| Schema::new(fields)),
        }),
        _ => Err(RouteRejection { index, label, issues }),
    }
}

fn check_fields(raw: &[RawField], parent: &str, issues: &mut Vec<RouteIssue>) -> Vec<FieldSpec> {
    raw.iter()
        .enumerate()
        .map(|(i, field)| check_field(i, field, parent, issues))
        .collect()
}

fn parse_bound(
    value: Option<&Value>,
    bound: &'static str,
    field: &str,
    issues: &mut Vec<RouteIssue>,
) -> Option<Decimal> {
    let parsed = match value? {
        Value::Null => return None,
        Value::Number(n) => number_to_decimal(n),
        Value::String(s) => parse_decimal(s),
        _ => None,
    };
    if parsed.is_none() {
        issues.push(RouteIssue::InvalidBound {
            field: field.to_string(),
            bound,
            value: value.map(ToString::to_string).unwrap_or_default(),
        });
    }
    parsed
}

fn check_field(index: usize, raw: &RawField, parent: &str, issues: &mut Vec<RouteIssue>) -> FieldSpec {
    let name = blank(raw.name.as_deref());
    let own = name.map_or_else(|| format!("#{index}"), str::to_string);
    let label = if parent.is_empty() {
        format!("field '{own}'")
    } else {
        format!("field '{parent}.{own}'")
    };
    issues.extend(raw.problems.iter().map(|reason| RouteIssue::InvalidFieldKey {
        field: label.clone(),
        reason: reason.clone(),
    }));
    if name.is_none() {
        issues.push(RouteIssue::MissingFieldName { field: label.clone() });
    }

    let type_name = blank(raw.type_name.as_deref()).unwrap_or_default();
    let kind = FieldKind::from_type_name(type_name);
    if type_name.is_empty() {
        issues.push(RouteIssue::MissingFieldType { field: label.clone() });
    } else if kind.is_none() {
        issues.push(RouteIssue::UnsupportedFieldType {
            field: label.clone(),
            type_name: type_name.to_string(),
        });
    }

    let mut spec = FieldSpec::new(name.unwrap_or_default(), type_name);
    spec.required = raw.required;

    if kind == Some(FieldKind::Object) {
        if let Some(nested) = raw.fields.as_deref().filter(|f| !f.is_empty()) {
            let path = if parent.is_empty() { own.clone() } else { format!("{parent}.{own}") };
            spec.fields = Some(check_fields(nested, &path, issues));
        }
    }

    spec.min = parse_bound(raw.min.as_ref(), "min", &label, issues);
    spec.max = parse_bound(raw.max.as_ref(), "max", &label, issues);
    if let (Some(min), Some(max)) = (spec.min, spec.max) {
        if min > max {
            issues.push(RouteIssue::MinGreaterThanMax {
                field: label.clone(),
                min,
                max,
            });
        }
    }

    if let Some(max_length) = raw.max_length {
        match usize::try_from(max_length) {
            Ok(len) => spec.max_length = Some(len),
            Err(_) => issues.push(RouteIssue::NegativeMaxLength {
                field: label.clone(),
                value: max_length,
            }),
        }
    }

    if let Some(source) = blank(raw.reg_exp.as_deref()) {
        let pattern = FieldPattern::new(source);
        if let Err(reason) = pattern.regex() {
            issues.push(RouteIssue::InvalidRegex {
                field: label.clone(),
                reason: reason.to_string(),
            });
        }
        spec.pattern = Some(pattern);
    }

    match raw.allowed_values.as_ref() {
        Some(values) if values.is_empty() => {
            issues.push(RouteIssue::EmptyAllowedValues { field: label });
        }
        Some(values) => spec.allowed_values = Some(values.clone()),
        None => {}
    }

    spec
}

/// Owner of the live route table
///
/// Readers take a snapshot per request; configuration builds a fresh table
/// and swaps it in whole.
pub struct Configurator {
    catalog: HandlerCatalog,
    table: ArcSwap<RouteTable>,
    configuring: AtomicBool,
}

impl fmt::Debug for Configurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configurator")
            .field("catalog", &self.catalog)
            .field("routes", &self.table.load().len())
            .finish_non_exhaustive()
    }
}

/// Clears the re-entry flag when configuration ends, even on panic
struct ConfigureGuard<'a>(&'a AtomicBool);

impl Drop for ConfigureGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Configurator {
    /// Create a configurator with an empty table
    #[must_use]
    pub fn new(catalog: HandlerCatalog) -> Self {
        Self {
            catalog,
            table: ArcSwap::from_pointee(RouteTable::default()),
            configuring: AtomicBool::new(false),
        }
    }

    fn begin(&self) -> Result<ConfigureGuard<'_>> {
        self.configuring
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| Error::ConfigurationInProgress)?;
        Ok(ConfigureGuard(&self.configuring))
    }

    /// Build a table from `file` and publish it
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigurationInProgress` if another configuration is
    /// running; nothing is changed in that case.
    pub fn configure(&self, file: &RouteFile) -> Result<LoadReport> {
        let _guard = self.begin()?;
        let (table, report) = self.build(file);
        self.table.store(Arc::new(table));
        Ok(report)
    }

    /// Parse a routes document and publish the resulting table
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unparsable document and
    /// `Error::ConfigurationInProgress` for a concurrent call.
    pub fn configure_from_str(&self, origin: &str, text: &str) -> Result<LoadReport> {
        let file: RouteFile = json::parse_json(origin, text)?;
        self.configure(&file)
    }

    /// Read a routes file and publish the resulting table
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the file cannot be read or parsed.
    pub fn load_file(&self, path: &Path) -> Result<LoadReport> {
        let file: RouteFile = json::read_json_file(path)?;
        info!(path = %path.display(), "Loading route table");
        self.configure(&file)
    }

    /// Re-read a routes file and swap the table in
    ///
    /// The current table stays in place when the file cannot be parsed or
    /// when it yields no routes while the current table has some.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the reload was refused.
    pub fn reload(&self, path: &Path) -> Result<LoadReport> {
        let file: RouteFile = json::read_json_file(path)?;
        let _guard = self.begin()?;
        let (table, report) = self.build(&file);

        if !report.is_ready() && !self.table.load().is_empty() {
            error!(path = %path.display(), "Reloaded routes contain no valid route; keeping previous table");
            return Err(Error::Config {
                origin: path.display().to_string(),
                reason: "no valid routes; previous table kept".to_string(),
            });
        }

        self.table.store(Arc::new(table));
        info!(path = %path.display(), routes = report.accepted, "Route table reloaded");
        Ok(report)
    }

    fn build(&self, file: &RouteFile) -> (RouteTable, LoadReport) {
        if file.routes().is_empty() {
            warn!("No API routes found in configuration");
        }
        let (table, report) = RouteTable::build(file, &self.catalog);

        for rejection in &report.rejected {
            error!(
                index = rejection.index,
                route = %rejection.label,
                errors = rejection.issues.len(),
                issues = %rejection,
                "Route validation failed, skipping route"
            );
        }

        if report.rejected.is_empty() {
            info!(total = report.total, valid = report.accepted, "API routes validation completed");
        } else {
            warn!(
                total = report.total,
                valid = report.accepted,
                invalid = report.rejected.len(),
                "API routes validation completed with errors"
            );
        }

        if report.is_ready() {
            info!("Route table is ready");
        } else {
            error!("Route table has no valid routes; gateway is not ready");
        }
        (table, report)
    }

    /// Current table snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// At least one route is registered
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.table.load().is_empty()
    }

    /// Handler catalog routes are resolved against
    #[must_use]
    pub const fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }
}
