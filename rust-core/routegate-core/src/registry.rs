//! # Handler Registry
//!
//! Map from [`DispatchKey`] to handler identifier.
//!
//! The registry is filled once while a route table is built and is then
//! frozen inside an immutable snapshot; concurrent readers share it through
//! an `Arc` and never take a lock.

use crate::dispatch::DispatchKey;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dispatch key to handler identifier lookup
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<DispatchKey, String>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a dispatch key
    ///
    /// # Arguments
    ///
    /// * `key` - Normalized dispatch key
    /// * `handler` - Handler identifier
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateRoute` if the key is already registered; the
    /// existing entry is left untouched.
    pub fn register(&mut self, key: DispatchKey, handler: impl Into<String>) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(Error::DuplicateRoute {
                key: key.to_string(),
            });
        }
        self.entries.insert(key, handler.into());
        Ok(())
    }

    /// Look up the handler identifier for a key
    #[must_use]
    pub fn try_get(&self, key: &DispatchKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether a key is registered
    #[must_use]
    pub fn contains(&self, key: &DispatchKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<&DispatchKey> {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        keys
    }
}
