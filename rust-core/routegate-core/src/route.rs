//! # Route Definitions
//!
//! Raw route records as read from the routes file, and the validated
//! [`RouteDefinition`] the configurator produces from them.
//!
//! Raw records are read key by key and keep every field optional, so that
//! the configurator, not the deserializer, decides what is missing and a
//! mistyped key is reported next to every other problem in the record.

use crate::dispatch::{DispatchKey, Method};
use crate::schema::Schema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// Top-level routes document: `{"apiRoutes": [...]}`
///
/// Entries stay as raw JSON so one malformed record rejects only itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteFile {
    /// Route records, possibly absent or null
    #[serde(default, alias = "ApiRoutes")]
    pub api_routes: Option<Vec<Value>>,
}

impl RouteFile {
    /// Route records, empty when the list is absent
    #[must_use]
    pub fn routes(&self) -> &[Value] {
        self.api_routes.as_deref().unwrap_or_default()
    }
}

/// Key-by-key reader over one JSON object
///
/// A key holding the wrong type is recorded in `problems` and read as absent,
/// so one bad key does not hide the rest of the record. `null` reads as
/// absent.
struct Reader<'a> {
    map: &'a Map<String, Value>,
    problems: Vec<String>,
}

impl<'a> Reader<'a> {
    const fn new(map: &'a Map<String, Value>) -> Self {
        Self {
            map,
            problems: Vec::new(),
        }
    }

    fn raw(&self, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
        keys.iter()
            .find_map(|k| self.map.get_key_value(*k))
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
    }

    fn get<T: DeserializeOwned>(&mut self, keys: &[&str]) -> Option<T> {
        let (key, value) = self.raw(keys)?;
        match T::deserialize(value) {
            Ok(v) => Some(v),
            Err(e) => {
                self.problems.push(format!("'{key}': {e}"));
                None
            }
        }
    }

    fn fields(&mut self, keys: &[&str]) -> Option<Vec<RawField>> {
        let (key, value) = self.raw(keys)?;
        if let Value::Array(items) = value {
            Some(items.iter().map(RawField::from_value).collect())
        } else {
            self.problems
                .push(format!("'{key}': expected a list of fields, got {}", kind_of(value)));
            None
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// One route record before validation
#[derive(Debug, Clone, Default)]
pub struct RawRoute {
    /// Request path
    pub path: Option<String>,
    /// HTTP method name
    pub method: Option<String>,
    /// Auth scheme name (`auth` or `authType`)
    pub auth: Option<String>,
    /// Handler identifier (`handler` or `handlerIdentifier`)
    pub handler: Option<String>,
    /// `requestSchema` fields, from `{"fields": [...]}` or a bare list
    pub request_schema: Option<Vec<RawField>>,
    /// Keys that could not be read
    pub problems: Vec<String>,
}

impl RawRoute {
    /// Read a route record
    ///
    /// # Errors
    ///
    /// Returns a description when the record is not a JSON object.
    pub fn from_value(record: &Value) -> Result<Self, String> {
        let Value::Object(map) = record else {
            return Err(format!("expected an object, got {}", kind_of(record)));
        };
        let mut reader = Reader::new(map);

        let path = reader.get(&["path"]);
        let method = reader.get(&["method"]);
        let auth = reader.get(&["auth", "authType"]);
        let handler = reader.get(&["handler", "handlerIdentifier"]);
        let request_schema = match reader.raw(&["requestSchema"]) {
            None => None,
            Some((_, Value::Array(_))) => reader.fields(&["requestSchema"]),
            Some((_, Value::Object(schema))) => {
                let mut inner = Reader::new(schema);
                let fields = inner.fields(&["fields"]).unwrap_or_default();
                reader
                    .problems
                    .extend(inner.problems.iter().map(|p| format!("'requestSchema.{}", &p[1..])));
                Some(fields)
            }
            Some((key, other)) => {
                reader.problems.push(format!(
                    "'{key}': expected an object or a list, got {}",
                    kind_of(other)
                ));
                None
            }
        };

        Ok(Self {
            path,
            method,
            auth,
            handler,
            request_schema,
            problems: reader.problems,
        })
    }
}

/// One field record before validation
///
/// Bounds stay as raw JSON so both numbers and numeric strings are accepted
/// and a non-numeric bound becomes a reported issue instead of a parse error.
#[derive(Debug, Clone, Default)]
pub struct RawField {
    /// Key in the request body
    pub name: Option<String>,
    /// Type name
    pub type_name: Option<String>,
    /// Whether the field must be present
    pub required: bool,
    /// Lower bound
    pub min: Option<Value>,
    /// Upper bound
    pub max: Option<Value>,
    /// Maximum string length; signed so negatives can be reported
    pub max_length: Option<i64>,
    /// Regular expression (`regExp` or `regexp`)
    pub reg_exp: Option<String>,
    /// Allowed literal values
    pub allowed_values: Option<Vec<String>>,
    /// Nested fields (object kind only)
    pub fields: Option<Vec<RawField>>,
    /// Keys that could not be read
    pub problems: Vec<String>,
}

impl RawField {
    /// Read a field record; a non-object yields an empty field with one problem
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return Self {
                problems: vec![format!("expected an object, got {}", kind_of(value))],
                ..Self::default()
            };
        };
        let mut reader = Reader::new(map);

        let name = reader.get(&["name"]);
        let type_name = reader.get(&["type"]);
        let required = reader.get(&["required"]).unwrap_or(false);
        let min = reader.raw(&["min"]).map(|(_, v)| v.clone());
        let max = reader.raw(&["max"]).map(|(_, v)| v.clone());
        let max_length = reader.get(&["maxLength"]);
        let reg_exp = reader.get(&["regExp", "regexp"]);
        let allowed_values = reader.get(&["allowedValues"]);
        let fields = reader.fields(&["fields"]);

        Self {
            name,
            type_name,
            required,
            min,
            max,
            max_length,
            reg_exp,
            allowed_values,
            fields,
            problems: reader.problems,
        }
    }
}

/// Authentication scheme declared by a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// No authentication
    None,
    /// Bearer JWT bound to the request body
    Jwt,
    /// Shared secret from a configured token set
    StaticTokens,
    /// Recognized, answers 501
    OAuth2,
    /// Recognized, answers 501
    Basic,
    /// Recognized, answers 501
    ApiKey,
}

impl AuthType {
    /// Resolve a case-insensitive scheme name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let auth = match name.trim().to_lowercase().as_str() {
            "none" => Self::None,
            "jwt" => Self::Jwt,
            "static_tokens" => Self::StaticTokens,
            "oauth2" => Self::OAuth2,
            "basic" => Self::Basic,
            "api_key" => Self::ApiKey,
            _ => return None,
        };
        Some(auth)
    }

    /// Canonical scheme name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Jwt => "jwt",
            Self::StaticTokens => "static_tokens",
            Self::OAuth2 => "oauth2",
            Self::Basic => "basic",
            Self::ApiKey => "api_key",
        }
    }

    /// Whether requests on this scheme can be served
    #[must_use]
    pub const fn is_implemented(self) -> bool {
        matches!(self, Self::None | Self::Jwt | Self::StaticTokens)
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route that passed validation
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    /// Normalized dispatch key
    pub key: DispatchKey,
    /// Path as written
    pub path: String,
    /// Parsed method
    pub method: Method,
    /// Declared auth scheme
    pub auth: AuthType,
    /// Handler identifier (resolved against the handler catalog)
    pub handler: String,
    /// Body schema, absent when the route declares none
    pub schema: Option<Schema>,
}
