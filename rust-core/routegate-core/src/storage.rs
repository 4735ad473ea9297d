//! # Storage Module
//!
//! Named-query execution over SQLx pools (PostgreSQL and SQLite).
//!
//! SQL text never comes from a request. Handlers name an entity and a query;
//! the [`QueryCatalog`] maps that pair to SQL loaded from `*.json` files, and
//! `@name` placeholders in the SQL are bound from the handler's parameters.

use crate::error::{Error, Result};
use crate::json;
use crate::settings::DatabaseSettings;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One result row, column name to value
pub type DbRow = Map<String, Value>;

/// Runs named queries on behalf of handlers
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `query` of `entity` with `@name` parameters
    ///
    /// # Errors
    ///
    /// `Error::QueryNotFound` for an unknown entity/query pair and
    /// `Error::Database` for driver failures or missing parameters.
    async fn execute(&self, entity: &str, query: &str, params: &Map<String, Value>) -> Result<Vec<DbRow>>;
}

/// Placeholder syntax of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2` (PostgreSQL)
    Dollar,
    /// `?1`, `?2` (SQLite)
    Numbered,
}

/// SQL with `@name` placeholders rewritten to positional ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    /// Rewritten SQL
    pub sql: String,
    /// Parameter names by position (1-based in the SQL)
    pub names: Vec<String>,
}

impl BoundQuery {
    /// Rewrite `@name` placeholders
    ///
    /// A name used twice maps to the same position. Text inside single
    /// quotes is left alone, as is `@@`.
    #[must_use]
    pub fn rewrite(sql: &str, style: PlaceholderStyle) -> Self {
        let chars: Vec<char> = sql.chars().collect();
        let mut out = String::with_capacity(sql.len());
        let mut names: Vec<String> = Vec::new();
        let mut quoted = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                quoted = !quoted;
            }
            let starts_name = chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_');
            let after_at = i > 0 && chars[i - 1] == '@';
            if c != '@' || quoted || !starts_name || after_at {
                out.push(c);
                i += 1;
                continue;
            }

            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            let position = names.iter().position(|n| *n == name).unwrap_or_else(|| {
                names.push(name);
                names.len() - 1
            }) + 1;
            match style {
                PlaceholderStyle::Dollar => out.push_str(&format!("${position}")),
                PlaceholderStyle::Numbered => out.push_str(&format!("?{position}")),
            }
            i = end;
        }

        Self { sql: out, names }
    }

    /// Parameter values in position order
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when a placeholder has no value.
    pub fn values(&self, params: &Map<String, Value>) -> Result<Vec<Value>> {
        self.names
            .iter()
            .map(|name| {
                params.get(name).cloned().ok_or_else(|| Error::Database {
                    message: format!("missing parameter '@{name}'"),
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct QueryFile {
    #[serde(alias = "Queries")]
    queries: Option<HashMap<String, String>>,
}

/// Named SQL per entity
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    entities: HashMap<String, HashMap<String, String>>,
}

impl QueryCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file under `dir`, recursively
    ///
    /// The entity is the lower-case file stem. Files are read in path order
    /// and later files override query names of earlier ones. Broken files
    /// are skipped and reported in one error log; a missing directory gives
    /// an empty catalog.
    pub fn load_dir(dir: &Path) -> Self {
        let mut catalog = Self::new();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "Queries directory does not exist");
            return catalog;
        }

        let mut files = Vec::new();
        collect_json_files(dir, &mut files);
        files.sort();
        if files.is_empty() {
            warn!(path = %dir.display(), "No query files found");
            return catalog;
        }

        let mut problems = Vec::new();
        for path in &files {
            if let Err(problem) = catalog.load_file(path) {
                problems.push(problem);
            }
        }

        if !problems.is_empty() {
            error!(errors = %problems.join("; "), "Errors loading query files");
        }
        info!(entities = catalog.entities.len(), "Query catalog initialized");
        catalog
    }

    fn load_file(&mut self, path: &Path) -> std::result::Result<(), String> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let name = path.display();

        let text = std::fs::read_to_string(path).map_err(|e| format!("{name}: {e}"))?;
        if text.trim().is_empty() {
            return Err(format!("{name} is empty"));
        }
        let file: QueryFile = json::parse_json(&name.to_string(), &text).map_err(|e| e.to_string())?;
        let queries = file
            .queries
            .ok_or_else(|| format!("{name} has no root 'queries' element"))?;
        if queries.is_empty() {
            return Err(format!("{name} has no queries"));
        }
        let mut blank: Vec<&str> = queries
            .iter()
            .filter(|(_, sql)| sql.trim().is_empty())
            .map(|(n, _)| n.as_str())
            .collect();
        if !blank.is_empty() {
            blank.sort_unstable();
            return Err(format!("{name} has empty queries: {}", blank.join(", ")));
        }

        let count = queries.len();
        self.entities.entry(stem).or_default().extend(queries);
        info!(file = %name, count, "Loaded queries");
        Ok(())
    }

    /// Add or replace one query
    pub fn insert(&mut self, entity: &str, name: impl Into<String>, sql: impl Into<String>) {
        self.entities
            .entry(entity.to_lowercase())
            .or_default()
            .insert(name.into(), sql.into());
    }

    /// SQL for an entity/query pair; the entity is matched case-insensitively
    #[must_use]
    pub fn get(&self, entity: &str, query: &str) -> Option<&str> {
        if entity.trim().is_empty() || query.trim().is_empty() {
            return None;
        }
        self.entities
            .get(&entity.to_lowercase())?
            .get(query)
            .map(String::as_str)
            .filter(|sql| !sql.trim().is_empty())
    }

    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity was loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out);
        } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
            out.push(path);
        }
    }
}

/// Database connection pool supporting multiple backends
#[derive(Debug, Clone)]
pub enum DatabasePool {
    /// SQLite connection pool
    Sqlite(SqlitePool),
    /// PostgreSQL connection pool
    Postgres(PgPool),
}

fn db_error(context: &str, e: &sqlx::Error) -> Error {
    Error::Database {
        message: format!("{context}: {e}"),
    }
}

impl DatabasePool {
    /// Connect by URL scheme (`postgres://`, `postgresql://` or `sqlite:`)
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` for an unknown scheme or a failed connection.
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::connect_postgres(url, max_connections).await
        } else if url.starts_with("sqlite:") {
            Self::connect_sqlite(url, max_connections).await
        } else {
            Err(Error::Database {
                message: "unsupported database URL scheme".to_string(),
            })
        }
    }

    /// Connect to a SQLite database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_sqlite(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| db_error("SQLite connection failed", &e))?;
        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_postgres(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| db_error("PostgreSQL connection failed", &e))?;
        Ok(Self::Postgres(pool))
    }

    /// Placeholder syntax of this backend
    #[must_use]
    pub const fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            Self::Sqlite(_) => PlaceholderStyle::Numbered,
            Self::Postgres(_) => PlaceholderStyle::Dollar,
        }
    }

    /// Execute a statement without parameters, returning affected rows
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on driver failure.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let result = match self {
            Self::Sqlite(pool) => sqlx::query(sql).execute(pool).await.map(|r| r.rows_affected()),
            Self::Postgres(pool) => sqlx::query(sql).execute(pool).await.map(|r| r.rows_affected()),
        };
        result.map_err(|e| db_error("Query error", &e))
    }

    /// Run a query with positional parameters and collect all rows
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on driver failure.
    pub async fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<DbRow>> {
        match self {
            Self::Sqlite(pool) => {
                let rows: Vec<SqliteRow> = bind_sqlite(sqlx::query(sql), params)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| db_error("Query error", &e))?;
                Ok(rows.iter().map(sqlite_row_to_map).collect())
            }
            Self::Postgres(pool) => {
                let rows: Vec<PgRow> = bind_postgres(sqlx::query(sql), params)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| db_error("Query error", &e))?;
                Ok(rows.iter().map(pg_row_to_map).collect())
            }
        }
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

fn bind_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn bind_postgres<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Convert SQLite row to a column map
fn sqlite_row_to_map(row: &SqliteRow) -> DbRow {
    let mut map = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
            "REAL" => row.try_get::<f64, _>(i).map(float_value).unwrap_or(Value::Null),
            "BOOLEAN" => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            "TEXT" => row.try_get::<String, _>(i).map(Value::String).unwrap_or(Value::Null),
            // expression columns carry no declared type
            _ => row
                .try_get::<i64, _>(i)
                .map(Value::from)
                .or_else(|_| row.try_get::<f64, _>(i).map(float_value))
                .or_else(|_| row.try_get::<String, _>(i).map(Value::String))
                .unwrap_or(Value::Null),
        };
        map.insert(column.name().to_string(), value);
    }

    map
}

/// Convert PostgreSQL row to a column map
fn pg_row_to_map(row: &PgRow) -> DbRow {
    let mut map = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<i16, _>(i).map(Value::from).unwrap_or(Value::Null),
            "INT4" => row.try_get::<i32, _>(i).map(Value::from).unwrap_or(Value::Null),
            "INT8" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
            "FLOAT4" => row
                .try_get::<f32, _>(i)
                .map(|f| float_value(f64::from(f)))
                .unwrap_or(Value::Null),
            "FLOAT8" => row.try_get::<f64, _>(i).map(float_value).unwrap_or(Value::Null),
            "BOOL" => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            _ => row.try_get::<String, _>(i).map(Value::String).unwrap_or(Value::Null),
        };
        map.insert(column.name().to_string(), value);
    }

    map
}

/// Named pools plus the query catalog
///
/// One pool is active at a time; it starts as the default pool and can be
/// switched while requests are running.
pub struct Storage {
    pools: HashMap<String, DatabasePool>,
    default_pool: String,
    active_pool: ArcSwap<String>,
    catalog: QueryCatalog,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pools: Vec<&String> = self.pools.keys().collect();
        pools.sort_unstable();
        f.debug_struct("Storage")
            .field("pools", &pools)
            .field("default_pool", &self.default_pool)
            .field("active_pool", &self.active_pool.load().as_str())
            .field("entities", &self.catalog.len())
            .finish()
    }
}

impl Storage {
    /// Connect every configured pool and load the query catalog
    ///
    /// Pool names are lower-cased; pools with an empty URL are skipped. When
    /// `defaultPool` is absent the first pool by name is the default.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when no pool is usable, a pool fails to
    /// connect, or the default pool is not configured.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let mut pools = HashMap::new();
        for (name, url) in &settings.pools {
            let name = name.to_lowercase();
            if url.trim().is_empty() {
                warn!(pool = %name, "Empty connection string; pool skipped");
                continue;
            }
            let pool = DatabasePool::connect(url, settings.max_connections).await?;
            debug!(pool = %name, "Pool connected");
            pools.insert(name, pool);
        }

        let default_pool = match settings.default_pool.as_deref() {
            Some(name) => name.to_lowercase(),
            None => {
                let mut names: Vec<&String> = pools.keys().collect();
                names.sort_unstable();
                names.first().map(|n| (*n).clone()).unwrap_or_default()
            }
        };

        let catalog = settings
            .queries_dir
            .as_deref()
            .map(|dir| QueryCatalog::load_dir(Path::new(dir)))
            .unwrap_or_default();

        Self::from_pools(pools, &default_pool, catalog)
    }

    /// Assemble storage from already connected pools
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when `pools` is empty or lacks `default_pool`.
    pub fn from_pools(
        pools: HashMap<String, DatabasePool>,
        default_pool: &str,
        catalog: QueryCatalog,
    ) -> Result<Self> {
        if pools.is_empty() {
            return Err(Error::Database {
                message: "no database pools configured".to_string(),
            });
        }
        let default_pool = default_pool.to_lowercase();
        if !pools.contains_key(&default_pool) {
            return Err(Error::Database {
                message: format!("default pool '{default_pool}' is not configured"),
            });
        }

        let mut names: Vec<&String> = pools.keys().collect();
        names.sort_unstable();
        info!(pools = ?names, active = %default_pool, "Storage initialized");

        Ok(Self {
            active_pool: ArcSwap::from_pointee(default_pool.clone()),
            pools,
            default_pool,
            catalog,
        })
    }

    /// Name of the pool queries currently run on
    #[must_use]
    pub fn active_pool(&self) -> Arc<String> {
        self.active_pool.load_full()
    }

    /// Name of the default pool
    #[must_use]
    pub fn default_pool(&self) -> &str {
        &self.default_pool
    }

    /// Make `name` the active pool
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` for an unknown pool; the active pool is
    /// unchanged then.
    pub fn switch_pool(&self, name: &str) -> Result<()> {
        let name = name.to_lowercase();
        if !self.pools.contains_key(&name) {
            return Err(Error::Database {
                message: format!("unknown pool '{name}'"),
            });
        }
        info!(pool = %name, "Active pool switched");
        self.active_pool.store(Arc::new(name));
        Ok(())
    }

    /// Make the default pool active again
    pub fn reset_pool(&self) {
        self.active_pool.store(Arc::new(self.default_pool.clone()));
    }

    /// Pool by name
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<&DatabasePool> {
        self.pools.get(&name.to_lowercase())
    }

    /// Query catalog
    #[must_use]
    pub const fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Run a named query on a given pool
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::execute`]; also `Error::Database` for an
    /// unknown pool.
    pub async fn execute_on(
        &self,
        pool_name: &str,
        entity: &str,
        query: &str,
        params: &Map<String, Value>,
    ) -> Result<Vec<DbRow>> {
        let sql = self.catalog.get(entity, query).ok_or_else(|| Error::QueryNotFound {
            entity: entity.to_string(),
            query: query.to_string(),
        })?;
        let pool = self.pool(pool_name).ok_or_else(|| Error::Database {
            message: format!("unknown pool '{pool_name}'"),
        })?;

        let bound = BoundQuery::rewrite(sql, pool.placeholder_style());
        let values = bound.values(params)?;
        debug!(pool = %pool_name, entity, query, params = values.len(), "Executing query");
        pool.fetch_rows(&bound.sql, &values).await
    }

    /// Close every pool
    pub async fn close(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl QueryExecutor for Storage {
    async fn execute(&self, entity: &str, query: &str, params: &Map<String, Value>) -> Result<Vec<DbRow>> {
        let active = self.active_pool();
        self.execute_on(&active, entity, query, params).await
    }
}
