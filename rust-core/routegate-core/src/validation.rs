//! # Validation Module
//!
//! Structured validation errors and the schema walker that produces them.
//!
//! Request-time validation is fail-fast: the first failing field ends the
//! walk, so a [`ValidationErrors`] returned by [`validate`] holds at most one
//! entry. Load-time route validation (see `configurator`) is exhaustive.

use crate::fields;
use crate::schema::{FieldSpec, Schema};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    /// Required field is absent
    MissingField,
    /// Required field is present but null
    NullValue,
    /// Value has the wrong JSON type
    InvalidType,
    /// Value is not in the allowed set
    InvalidValue,
    /// Value is below `min`
    MinValue,
    /// Value is above `max`
    MaxValue,
    /// String is longer than `maxLength`
    MaxLengthExceeded,
    /// String does not match `regExp`
    PatternMismatch,
    /// `regExp` does not compile
    InvalidRegex,
    /// Field type is not a supported kind
    UnsupportedType,
    /// Card number is malformed or fails the Luhn check
    InvalidCardNumber,
    /// Card expiry month is malformed or out of range
    InvalidCardExpireMonth,
    /// Card expiry year is malformed or too old
    InvalidCardExpireYear,
    /// CVV is malformed
    InvalidCardCvv,
    /// Amount has more than two fractional digits
    TooManyDecimalPlaces,
}

impl ValidationCode {
    /// Wire name of the code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::NullValue => "null_value",
            Self::InvalidType => "invalid_type",
            Self::InvalidValue => "invalid_value",
            Self::MinValue => "min_value",
            Self::MaxValue => "max_value",
            Self::MaxLengthExceeded => "max_length_exceeded",
            Self::PatternMismatch => "pattern_mismatch",
            Self::InvalidRegex => "invalid_regex",
            Self::UnsupportedType => "unsupported_type",
            Self::InvalidCardNumber => "invalid_card_number",
            Self::InvalidCardExpireMonth => "invalid_card_expire_month",
            Self::InvalidCardExpireYear => "invalid_card_expire_year",
            Self::InvalidCardCvv => "invalid_card_cvv",
            Self::TooManyDecimalPlaces => "too_many_decimal_places",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Field name, dotted for nested fields (e.g. "card.number")
    pub field: String,
    /// Machine-readable error code
    pub code: ValidationCode,
    /// Human-readable error message
    pub message: String,
}

impl ValidationError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a "missing field" error
    pub fn missing(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("Field '{field}' is required"),
            field,
            code: ValidationCode::MissingField,
        }
    }

    /// Create a "null value" error
    pub fn null_value(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("Field '{field}' cannot be null"),
            field,
            code: ValidationCode::NullValue,
        }
    }

    /// Create an "invalid type" error
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field = field.into();
        Self {
            message: format!("Field '{field}' must be {expected}"),
            field,
            code: ValidationCode::InvalidType,
        }
    }

    /// Prefix the field path with a parent name
    #[must_use]
    pub fn nested_in(mut self, parent: &str) -> Self {
        self.field = format!("{parent}.{}", self.field);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.field, self.code, self.message)
    }
}

/// Collection of validation errors
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// First error, if any
    #[must_use]
    pub fn first(&self) -> Option<&ValidationError> {
        self.errors.first()
    }

    /// Machine-readable codes, for logging
    #[must_use]
    pub fn codes(&self) -> Vec<&'static str> {
        self.errors.iter().map(|e| e.code.as_str()).collect()
    }

    /// Group errors by field
    #[must_use]
    pub fn by_field(&self) -> HashMap<String, Vec<&ValidationError>> {
        let mut map: HashMap<String, Vec<&ValidationError>> = HashMap::new();
        for error in &self.errors {
            map.entry(error.field.clone()).or_default().push(error);
        }
        map
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, ValidationErrors>;

/// Validate a request body against a route schema
///
/// An absent schema, or one with no fields, always passes. Otherwise fields
/// are checked in declaration order and the first failure stops the walk.
#[must_use]
pub fn validate(body: Option<&Value>, schema: Option<&Schema>) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let Some(schema) = schema.filter(|s| !s.is_empty()) else {
        return errors;
    };

    for spec in &schema.fields {
        if let Some(error) = validate_field(body, spec) {
            errors.add(error);
            break;
        }
    }
    errors
}

/// Validate one field of `container` (the object that should hold it)
pub(crate) fn validate_field(container: Option<&Value>, spec: &FieldSpec) -> Option<ValidationError> {
    let container = container.filter(|v| !v.is_null());
    let value = container.and_then(|c| c.get(&spec.name));

    match value {
        None if spec.required => Some(ValidationError::missing(&spec.name)),
        None => None,
        Some(Value::Null) if spec.required => Some(ValidationError::null_value(&spec.name)),
        Some(Value::Null) => None,
        Some(value) => match spec.kind {
            Some(kind) => fields::validate_value(kind, value, spec),
            None => Some(ValidationError::new(
                &spec.name,
                ValidationCode::UnsupportedType,
                format!("Field type '{}' is not supported", spec.type_name),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(fields: Vec<FieldSpec>) -> Schema {
        Schema::new(fields)
    }

    #[test]
    fn test_no_schema_passes() {
        let body = json!({"anything": 1});
        assert!(validate(Some(&body), None).is_empty());
        assert!(validate(Some(&body), Some(&Schema::default())).is_empty());
    }

    #[test]
    fn test_missing_required_field_is_single_error() {
        let s = schema(vec![
            FieldSpec::new("name", "string").required(),
            FieldSpec::new("email", "string").required(),
        ]);
        let body = json!({});

        let errors = validate(Some(&body), Some(&s));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors[0].code, ValidationCode::MissingField);
        assert_eq!(errors.errors[0].field, "name");
    }

    #[test]
    fn test_absent_body_only_fails_required_fields() {
        let optional = schema(vec![FieldSpec::new("note", "string")]);
        assert!(validate(None, Some(&optional)).is_empty());

        let required = schema(vec![FieldSpec::new("note", "string").required()]);
        let errors = validate(None, Some(&required));
        assert_eq!(errors.codes(), vec!["missing_field"]);

        let null_body = Value::Null;
        let errors = validate(Some(&null_body), Some(&required));
        assert_eq!(errors.codes(), vec!["missing_field"]);
    }

    #[test]
    fn test_null_values() {
        let s = schema(vec![
            FieldSpec::new("nickname", "string"),
            FieldSpec::new("name", "string").required(),
        ]);
        let body = json!({"nickname": null, "name": null});

        let errors = validate(Some(&body), Some(&s));
        assert_eq!(errors.codes(), vec!["null_value"]);
        assert_eq!(errors.errors[0].field, "name");
    }

    #[test]
    fn test_unsupported_type() {
        let s = schema(vec![FieldSpec::new("id", "uuid").required()]);
        let body = json!({"id": "abc"});

        let errors = validate(Some(&body), Some(&s));
        assert_eq!(errors.codes(), vec!["unsupported_type"]);
    }

    #[test]
    fn test_fail_fast_stops_at_first_error() {
        let s = schema(vec![
            FieldSpec::new("age", "integer").required(),
            FieldSpec::new("name", "string").required(),
        ]);
        let body = json!({"age": "old"});

        let errors = validate(Some(&body), Some(&s));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors[0].field, "age");
        assert_eq!(errors.errors[0].code, ValidationCode::InvalidType);
    }

    #[test]
    fn test_nested_error_is_prefixed() {
        let s = schema(vec![FieldSpec::new("card", "array")
            .required()
            .fields(vec![FieldSpec::new("cvv", "card_cvv").required()])]);
        let body = json!({"card": {"cvv": "12"}});

        let errors = validate(Some(&body), Some(&s));
        let error = errors.first().unwrap();
        assert_eq!(error.field, "card.cvv");
        assert_eq!(error.code, ValidationCode::InvalidCardCvv);
    }

    #[test]
    fn test_valid_body_passes() {
        let s = schema(vec![
            FieldSpec::new("name", "string").required().max_length(10),
            FieldSpec::new("age", "int"),
            FieldSpec::new("active", "bool"),
        ]);
        let body = json!({"name": "Ada", "age": "36", "active": "TRUE"});
        assert!(validate(Some(&body), Some(&s)).is_empty());
    }

    #[test]
    fn test_codes_serialize_snake_case() {
        let error = ValidationError::missing("email");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("\"missing_field\""));
        assert!(json.contains("email"));
    }

    #[test]
    fn test_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add(ValidationError::missing("email"));
        errors.add(ValidationError::invalid_type("email", "a string"));
        errors.add(ValidationError::missing("name"));

        let grouped = errors.by_field();
        assert_eq!(grouped.get("email").map(Vec::len), Some(2));
        assert_eq!(grouped.get("name").map(Vec::len), Some(1));
    }
}
