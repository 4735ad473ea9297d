//! # Errors
//!
//! Operator-facing failures of the gateway: startup, configuration, storage
//! and handler errors. Request-level outcomes (auth, validation) have their own
//! types and never surface here.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway error
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// Listen address
        address: String,
        /// Socket error
        #[source]
        source: std::io::Error,
    },

    /// A configuration document could not be parsed
    #[error("Invalid configuration in {origin}: {reason}")]
    Config {
        /// Which document failed (file path or logical name)
        origin: String,
        /// Parser message
        reason: String,
    },

    /// A dispatch key was registered twice
    #[error("Duplicate route registration: {key}")]
    DuplicateRoute {
        /// The colliding dispatch key
        key: String,
    },

    /// A second configure call arrived while one was still running
    #[error("Route table configuration is already in progress")]
    ConfigurationInProgress,

    /// Connection-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Envelope or document (de)serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File or socket I/O
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool connection, bind or query failure
    #[error("Database error: {message}")]
    Database {
        /// Driver message
        message: String,
    },

    /// A named query is not present in the query catalog
    #[error("Query '{query}' not found for entity '{entity}'")]
    QueryNotFound {
        /// Entity (query file) name
        entity: String,
        /// Query name inside the entity
        query: String,
    },

    /// A business handler failed
    #[error("Handler '{handler}' failed: {message}")]
    Handler {
        /// Handler identifier
        handler: String,
        /// Internal failure detail (never sent to the caller)
        message: String,
    },

    /// Request body over the configured limit
    #[error("Request body of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Configured `maxBodySize`
        limit: usize,
        /// Declared or received size
        actual: usize,
    },
}

impl Error {
    /// Shorthand for a handler failure
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_route_error() {
        let err = Error::DuplicateRoute {
            key: "/api/users:GET".to_string(),
        };
        assert!(err.to_string().contains("/api/users:GET"));
    }

    #[test]
    fn test_bind_error_names_address() {
        let err = Error::BindError {
            address: "127.0.0.1:8000".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:8000"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = Error::PayloadTooLarge { limit: 8, actual: 20 };
        assert_eq!(err.to_string(), "Request body of 20 bytes exceeds the 8 byte limit");
    }

    #[test]
    fn test_handler_error_helper() {
        let err = Error::handler("users.list", "pool closed");
        assert!(err.to_string().contains("users.list"));
        assert!(err.to_string().contains("pool closed"));
    }
}
