//! # Request Schema Model
//!
//! Declarative description of the fields a route expects in its JSON body.
//!
//! `FieldKind` is a closed enum: adding a kind means adding a variant and the
//! compiler points at every `match` that needs a new arm.

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Number;
use std::fmt;
use std::str::FromStr;

/// Supported field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// UTF-8 string
    String,
    /// Whole number (native or numeric string)
    Integer,
    /// Decimal number (native or numeric string)
    Decimal,
    /// `true`/`false` (native or string)
    Boolean,
    /// Nested object validated against `fields`
    ///
    /// Spelled `array` in route tables even though the value must be an object.
    Object,
    /// 16-digit payment card number with Luhn check
    CardNumber,
    /// Two-digit expiry year
    CardExpireYear,
    /// Two-digit expiry month
    CardExpireMonth,
    /// Three-digit card verification value
    CardCvv,
    /// Monetary amount given as a JSON number
    NumberAmount,
    /// Monetary amount given as a numeric string
    StringAmount,
}

impl FieldKind {
    /// Every type name accepted in a route table
    pub const TYPE_NAMES: [&'static str; 15] = [
        "string",
        "integer",
        "int",
        "decimal",
        "float",
        "double",
        "boolean",
        "bool",
        "array",
        "card_number",
        "card_expire_year",
        "card_expire_month",
        "card_cvv",
        "number_amount",
        "string_amount",
    ];

    /// Resolve a case-insensitive type name
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_lowercase().as_str() {
            "string" => Self::String,
            "integer" | "int" => Self::Integer,
            "decimal" | "float" | "double" => Self::Decimal,
            "boolean" | "bool" => Self::Boolean,
            "array" => Self::Object,
            "card_number" => Self::CardNumber,
            "card_expire_year" => Self::CardExpireYear,
            "card_expire_month" => Self::CardExpireMonth,
            "card_cvv" => Self::CardCvv,
            "number_amount" => Self::NumberAmount,
            "string_amount" => Self::StringAmount,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical type name
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Object => "array",
            Self::CardNumber => "card_number",
            Self::CardExpireYear => "card_expire_year",
            Self::CardExpireMonth => "card_expire_month",
            Self::CardCvv => "card_cvv",
            Self::NumberAmount => "number_amount",
            Self::StringAmount => "string_amount",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A `regExp` constraint, compiled once when the field is loaded
///
/// Compilation failures are kept rather than thrown so that the loader can
/// report them and the string validator can still answer `invalid_regex`.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    source: String,
    compiled: Result<Regex, String>,
}

impl FieldPattern {
    /// Compile a pattern
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source).map_err(|e| e.to_string());
        Self { source, compiled }
    }

    /// Pattern text as configured
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled regex, or the compiler's message
    pub fn regex(&self) -> Result<&Regex, &str> {
        self.compiled.as_ref().map_err(String::as_str)
    }
}

/// One validated body field
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name (key in the JSON object)
    pub name: String,
    /// Type name as written in configuration
    pub type_name: String,
    /// Resolved kind; `None` when `type_name` is not supported
    pub kind: Option<FieldKind>,
    /// Whether the field must be present and non-null
    pub required: bool,
    /// Inclusive lower bound for numeric kinds
    pub min: Option<Decimal>,
    /// Inclusive upper bound for numeric kinds
    pub max: Option<Decimal>,
    /// Maximum string length in characters
    pub max_length: Option<usize>,
    /// Pattern the string value must match
    pub pattern: Option<FieldPattern>,
    /// Literal values the field may take
    pub allowed_values: Option<Vec<String>>,
    /// Nested fields for the object kind
    pub fields: Option<Vec<FieldSpec>>,
}

impl FieldSpec {
    /// Create an optional field with no constraints
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            kind: FieldKind::from_type_name(&type_name),
            type_name,
            required: false,
            min: None,
            max: None,
            max_length: None,
            pattern: None,
            allowed_values: None,
            fields: None,
        }
    }

    /// Mark the field as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the inclusive lower bound
    #[must_use]
    pub fn min(mut self, min: Decimal) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the inclusive upper bound
    #[must_use]
    pub fn max(mut self, max: Decimal) -> Self {
        self.max = Some(max);
        self
    }

    /// Set the maximum length
    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set a regular expression constraint
    #[must_use]
    pub fn regexp(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(FieldPattern::new(pattern));
        self
    }

    /// Restrict the field to a set of literal values
    #[must_use]
    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Attach nested fields
    #[must_use]
    pub fn fields(mut self, fields: Vec<Self>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Ordered field list attached to one route
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Fields in declaration order
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    /// Create a schema from a field list
    #[must_use]
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// True when there is nothing to validate
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when at least one top-level field is required
    #[must_use]
    pub fn has_required(&self) -> bool {
        self.fields.iter().any(|f| f.required)
    }
}

/// Parse a decimal from configuration or request text
///
/// Plain notation only (`-12.50`); exponent forms are not numeric strings.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text.trim()).ok()
}

/// Exact value of a native JSON number, keeping the scale of its literal
///
/// JSON allows exponents here, so `1e-5` reads as `0.00001` (scale 5).
pub fn number_to_decimal(number: &Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .ok()
        .or_else(|| Decimal::from_scientific(&text).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(FieldKind::from_type_name("INT"), Some(FieldKind::Integer));
        assert_eq!(FieldKind::from_type_name("Double"), Some(FieldKind::Decimal));
        assert_eq!(FieldKind::from_type_name("bool"), Some(FieldKind::Boolean));
        assert_eq!(FieldKind::from_type_name("Array"), Some(FieldKind::Object));
        assert_eq!(FieldKind::from_type_name("uuid"), None);
    }

    #[test]
    fn test_every_type_name_resolves() {
        for name in FieldKind::TYPE_NAMES {
            assert!(FieldKind::from_type_name(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_field_builder() {
        let spec = FieldSpec::new("amount", "number_amount")
            .required()
            .min(Decimal::ONE)
            .max(Decimal::ONE_HUNDRED);
        assert!(spec.required);
        assert_eq!(spec.kind, Some(FieldKind::NumberAmount));
        assert_eq!(spec.max, Some(Decimal::ONE_HUNDRED));
    }

    #[test]
    fn test_unsupported_type_keeps_name() {
        let spec = FieldSpec::new("id", "uuid");
        assert_eq!(spec.kind, None);
        assert_eq!(spec.type_name, "uuid");
    }

    #[test]
    fn test_pattern_compile_failure_is_kept() {
        let ok = FieldPattern::new("^[a-z]+$");
        assert!(ok.regex().is_ok());

        let bad = FieldPattern::new("([a-z");
        assert!(bad.regex().is_err());
        assert_eq!(bad.source(), "([a-z");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("10.25"), Some(Decimal::new(1025, 2)));
        assert_eq!(parse_decimal(" -3 "), Some(Decimal::new(-3, 0)));
        assert_eq!(parse_decimal("1e3"), None);
        assert_eq!(parse_decimal("1.5E1"), None);
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_number_to_decimal_keeps_scale() {
        let body: serde_json::Value = serde_json::from_str(r#"[1e3, 1e-5, 10.10, 1.5e1]"#).unwrap();
        let read = |i: usize| match &body[i] {
            serde_json::Value::Number(n) => number_to_decimal(n).unwrap(),
            other => panic!("not a number: {other}"),
        };
        assert_eq!(read(0), Decimal::new(1000, 0));
        assert_eq!(read(1), Decimal::new(1, 5));
        assert_eq!(read(1).scale(), 5);
        assert_eq!(read(2).scale(), 2);
        assert_eq!(read(3), Decimal::new(15, 0));
    }

    #[test]
    fn test_schema_has_required() {
        let schema = Schema::new(vec![
            FieldSpec::new("a", "string"),
            FieldSpec::new("b", "string").required(),
        ]);
        assert!(schema.has_required());
        assert!(!Schema::default().has_required());
    }
}
