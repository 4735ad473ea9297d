//! # JSON Module
//!
//! Configuration documents are parsed with simd-json; request bodies and
//! responses go through `serde_json`, which keeps the literal text of numbers.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Parse a configuration document using simd-json
///
/// # Arguments
///
/// * `origin` - Name of the document, used in error messages
/// * `json_str` - JSON text
///
/// # Errors
///
/// Returns `Error::Config` if parsing fails
pub fn parse_json<T: DeserializeOwned>(origin: &str, json_str: &str) -> Result<T> {
    let mut bytes = json_str.as_bytes().to_vec();
    parse_json_bytes(origin, &mut bytes)
}

/// Parse configuration bytes in place using simd-json
///
/// # Errors
///
/// Returns `Error::Config` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(origin: &str, bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(|e| Error::Config {
        origin: origin.to_string(),
        reason: format!("Parse error: {e}"),
    })
}

/// Read and parse a configuration file
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be read or parsed
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let origin = path.display().to_string();
    let mut bytes = std::fs::read(path).map_err(|e| Error::Config {
        origin: origin.clone(),
        reason: e.to_string(),
    })?;
    parse_json_bytes(&origin, &mut bytes)
}

/// Serialize a value to a JSON string
///
/// # Errors
///
/// Returns `Error::Json` if serialization fails
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PoolEntry {
        name: String,
        size: u32,
    }

    #[test]
    fn test_parse_json_object() {
        let entry: PoolEntry = parse_json("pools", r#"{"name": "main", "size": 4}"#).unwrap();
        assert_eq!(entry.name, "main");
        assert_eq!(entry.size, 4);
    }

    #[test]
    fn test_parse_json_map() {
        let map: HashMap<String, String> =
            parse_json("tokens", r#"{"partner": "s3cret", "ops": "0ps"}"#).unwrap();
        assert_eq!(map.get("partner").map(String::as_str), Some("s3cret"));
    }

    #[test]
    fn test_invalid_json_names_origin() {
        let result: Result<PoolEntry> = parse_json("routes.json", "not valid json");
        match result {
            Err(Error::Config { origin, .. }) => assert_eq!(origin, "routes.json"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_read_missing_file() {
        let result: Result<PoolEntry> = read_json_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_to_json() {
        let json = to_json(&PoolEntry {
            name: "replica".to_string(),
            size: 2,
        })
        .unwrap();
        assert!(json.contains("replica"));
    }
}
