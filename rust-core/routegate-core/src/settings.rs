//! # Gateway Settings
//!
//! File model for the process settings document (camelCase JSON). Every
//! section and key is optional and falls back to the defaults below.

use crate::error::{Error, Result};
use crate::json;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Root settings document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Listener settings
    pub server: ServerSettings,
    /// Auth scheme settings
    pub auth: AuthSettings,
    /// Storage settings; no storage when absent
    pub database: Option<DatabaseSettings>,
}

impl GatewaySettings {
    /// Read settings from a JSON file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        json::read_json_file(path)
    }

    /// Parse settings from JSON text
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if parsing fails
    pub fn from_json(origin: &str, text: &str) -> Result<Self> {
        json::parse_json(origin, text)
    }
}

/// `server` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Listen address
    pub address: String,
    /// Maximum request body in bytes
    pub max_body_size: usize,
    /// Drain time for in-flight connections on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8000".to_string(),
            max_body_size: 1024 * 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `address` is not a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| Error::Config {
            origin: "server.address".to_string(),
            reason: format!("{e}: {}", self.address),
        })
    }
}

/// `auth` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSettings {
    /// `jwt` scheme
    pub jwt: JwtSettings,
    /// `static_tokens` scheme
    pub static_tokens: StaticTokenSettings,
}

/// `auth.jwt` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JwtSettings {
    /// PEM-encoded RSA public key
    pub public_key: Option<String>,
    /// Accepted signing algorithms
    pub algorithms: Vec<String>,
    /// Header carrying the token
    pub header: String,
    /// Prefix before the token, matched case-insensitively
    pub prefix: String,
    /// Upper bound on verification time
    pub timeout_ms: u64,
    /// Clock skew allowed on `exp`/`nbf`
    pub leeway_secs: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            public_key: None,
            algorithms: vec!["RS256".to_string()],
            header: "authorization".to_string(),
            prefix: "Bearer ".to_string(),
            timeout_ms: 2000,
            leeway_secs: 60,
        }
    }
}

/// `auth.staticTokens` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StaticTokenSettings {
    /// Header carrying the token
    pub header: String,
    /// Prefix before the token, matched case-insensitively
    pub prefix: String,
    /// Client name to token
    pub tokens: HashMap<String, String>,
}

impl Default for StaticTokenSettings {
    fn default() -> Self {
        Self {
            header: "authorization".to_string(),
            prefix: "Static ".to_string(),
            tokens: HashMap::new(),
        }
    }
}

/// `database` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseSettings {
    /// Pool used when none is named; first pool by name when absent
    pub default_pool: Option<String>,
    /// Pool name to connection URL
    pub pools: HashMap<String, String>,
    /// Pool size
    pub max_connections: Option<u32>,
    /// Directory of named-query files
    pub queries_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GatewaySettings::from_json("settings", "{}").unwrap();
        assert_eq!(settings.server.address, "127.0.0.1:8000");
        assert_eq!(settings.server.max_body_size, 1024 * 1024);
        assert_eq!(settings.auth.jwt.prefix, "Bearer ");
        assert_eq!(settings.auth.jwt.algorithms, vec!["RS256"]);
        assert_eq!(settings.auth.static_tokens.prefix, "Static ");
        assert!(settings.database.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let settings = GatewaySettings::from_json(
            "settings",
            r#"{
                "server": {"address": "0.0.0.0:9090"},
                "auth": {"staticTokens": {"tokens": {"partner": "abc"}}, "jwt": {"timeoutMs": 500}},
                "database": {"defaultPool": "main", "pools": {"main": "sqlite::memory:"}}
            }"#,
        )
        .unwrap();

        assert_eq!(settings.server.socket_addr().unwrap().port(), 9090);
        assert_eq!(settings.server.shutdown_timeout_secs, 30);
        assert_eq!(settings.auth.jwt.timeout_ms, 500);
        assert_eq!(settings.auth.jwt.header, "authorization");
        assert_eq!(
            settings.auth.static_tokens.tokens.get("partner").map(String::as_str),
            Some("abc")
        );
        let db = settings.database.unwrap();
        assert_eq!(db.default_pool.as_deref(), Some("main"));
    }

    #[test]
    fn test_bad_address() {
        let server = ServerSettings {
            address: "nowhere".to_string(),
            ..ServerSettings::default()
        };
        assert!(matches!(server.socket_addr(), Err(Error::Config { .. })));
    }
}
