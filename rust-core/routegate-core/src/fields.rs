//! # Field Validators
//!
//! One pure function per [`FieldKind`]: `(value, spec) -> Option<ValidationError>`.
//! The caller has already handled absent and null values.

use crate::schema::{number_to_decimal, parse_decimal, FieldKind, FieldSpec};
use crate::validation::{validate_field, ValidationCode, ValidationError};
use rust_decimal::Decimal;
use serde_json::Value;

/// Two-digit years at or below this value are rejected
pub const CARD_YEAR_FLOOR: u32 = 22;

/// Maximum fractional digits for amount kinds
pub const AMOUNT_SCALE: u32 = 2;

const CARD_NUMBER_LEN: usize = 16;

/// Dispatch a present, non-null value to the validator for `kind`
pub fn validate_value(kind: FieldKind, value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    match kind {
        FieldKind::String => validate_string(value, spec),
        FieldKind::Integer => validate_integer(value, spec),
        FieldKind::Decimal => validate_decimal(value, spec),
        FieldKind::Boolean => validate_boolean(value, spec),
        FieldKind::Object => validate_object(value, spec),
        FieldKind::CardNumber => validate_card_number(value, spec),
        FieldKind::CardExpireYear => validate_card_expire_year(value, spec),
        FieldKind::CardExpireMonth => validate_card_expire_month(value, spec),
        FieldKind::CardCvv => validate_card_cvv(value, spec),
        FieldKind::NumberAmount => validate_amount(value, spec, false),
        FieldKind::StringAmount => match value {
            Value::String(_) => validate_amount(value, spec, true),
            _ => Some(ValidationError::invalid_type(&spec.name, "a string")),
        },
    }
}

/// Luhn check digit test over an all-digit string
///
/// Doubles every second digit from the right, folds values above 9 and
/// accepts when the sum is a multiple of ten.
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        if !b.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn one_of(spec: &FieldSpec, allowed: &[String]) -> ValidationError {
    ValidationError::new(
        &spec.name,
        ValidationCode::InvalidValue,
        format!("Field '{}' must be one of: {}", spec.name, allowed.join(", ")),
    )
}

fn validate_string(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let Value::String(text) = value else {
        return Some(ValidationError::invalid_type(&spec.name, "a string"));
    };

    if let Some(max) = spec.max_length {
        if text.chars().count() > max {
            return Some(ValidationError::new(
                &spec.name,
                ValidationCode::MaxLengthExceeded,
                format!("Field '{}' must not exceed {max} characters", spec.name),
            ));
        }
    }

    if let Some(allowed) = spec.allowed_values.as_deref().filter(|a| !a.is_empty()) {
        if !allowed.iter().any(|a| a == text) {
            return Some(one_of(spec, allowed));
        }
    }

    if let Some(pattern) = &spec.pattern {
        match pattern.regex() {
            Ok(re) if re.is_match(text) => {}
            Ok(_) => {
                return Some(ValidationError::new(
                    &spec.name,
                    ValidationCode::PatternMismatch,
                    format!("Field '{}' does not match required pattern", spec.name),
                ))
            }
            Err(_) => {
                return Some(ValidationError::new(
                    &spec.name,
                    ValidationCode::InvalidRegex,
                    format!("Invalid regex pattern for field '{}'", spec.name),
                ))
            }
        }
    }

    None
}

fn check_bounds(value: Decimal, min: Option<Decimal>, max: Option<Decimal>, spec: &FieldSpec) -> Option<ValidationError> {
    if let Some(min) = min {
        if value < min {
            return Some(ValidationError::new(
                &spec.name,
                ValidationCode::MinValue,
                format!("Field '{}' must be at least {min}", spec.name),
            ));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Some(ValidationError::new(
                &spec.name,
                ValidationCode::MaxValue,
                format!("Field '{}' must not exceed {max}", spec.name),
            ));
        }
    }
    None
}

fn validate_integer(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => return Some(ValidationError::invalid_type(&spec.name, "an integer")),
    };
    let Some(parsed) = parsed else {
        return Some(ValidationError::invalid_type(&spec.name, "a valid integer"));
    };

    // Bounds compare as whole numbers.
    check_bounds(
        Decimal::from(parsed),
        spec.min.map(|m| m.trunc()),
        spec.max.map(|m| m.trunc()),
        spec,
    )
}

fn validate_decimal(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let parsed = match value {
        Value::Number(n) => number_to_decimal(n),
        Value::String(s) => parse_decimal(s),
        _ => return Some(ValidationError::invalid_type(&spec.name, "a decimal number")),
    };
    match parsed {
        Some(d) => check_bounds(d, spec.min, spec.max, spec),
        None => Some(ValidationError::invalid_type(&spec.name, "a valid decimal number")),
    }
}

fn validate_boolean(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let parsed = match value {
        Value::Bool(b) => *b,
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => return Some(ValidationError::invalid_type(&spec.name, "a boolean")),
        },
        _ => return Some(ValidationError::invalid_type(&spec.name, "a boolean")),
    };

    if let Some(allowed) = spec.allowed_values.as_deref().filter(|a| !a.is_empty()) {
        let text = if parsed { "true" } else { "false" };
        if !allowed.iter().any(|a| a == text) {
            return Some(one_of(spec, allowed));
        }
    }
    None
}

fn validate_object(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    if !value.is_object() {
        return Some(ValidationError::invalid_type(&spec.name, "an object"));
    }
    spec.fields
        .iter()
        .flatten()
        .find_map(|nested| validate_field(Some(value), nested))
        .map(|e| e.nested_in(&spec.name))
}

fn validate_card_number(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let Value::String(raw) = value else {
        return Some(ValidationError::invalid_type(&spec.name, "a string"));
    };
    let number: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();

    let problem = if !all_digits(&number) {
        "must contain only digits"
    } else if number.len() != CARD_NUMBER_LEN {
        "must be exactly 16 digits"
    } else if !luhn_valid(&number) {
        "is not a valid card number"
    } else {
        return None;
    };

    Some(ValidationError::new(
        &spec.name,
        ValidationCode::InvalidCardNumber,
        format!("Field '{}' {problem}", spec.name),
    ))
}

/// Shared shape check for the fixed-width card fields
fn card_digits<'a>(
    value: &'a Value,
    spec: &FieldSpec,
    width: usize,
    code: ValidationCode,
) -> Result<&'a str, ValidationError> {
    let Value::String(text) = value else {
        return Err(ValidationError::invalid_type(&spec.name, "a string"));
    };
    if !all_digits(text) {
        return Err(ValidationError::new(
            &spec.name,
            code,
            format!("Field '{}' must contain only digits", spec.name),
        ));
    }
    if text.len() != width {
        return Err(ValidationError::new(
            &spec.name,
            code,
            format!("Field '{}' must be exactly {width} digits", spec.name),
        ));
    }
    Ok(text)
}

fn validate_card_expire_month(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let code = ValidationCode::InvalidCardExpireMonth;
    let text = match card_digits(value, spec, 2, code) {
        Ok(text) => text,
        Err(e) => return Some(e),
    };
    match text.parse::<u32>() {
        Ok(1..=12) => None,
        _ => Some(ValidationError::new(
            &spec.name,
            code,
            format!("Field '{}' must be between 01 and 12", spec.name),
        )),
    }
}

fn validate_card_expire_year(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    let code = ValidationCode::InvalidCardExpireYear;
    let text = match card_digits(value, spec, 2, code) {
        Ok(text) => text,
        Err(e) => return Some(e),
    };
    match text.parse::<u32>() {
        Ok(year) if year > CARD_YEAR_FLOOR => None,
        _ => Some(ValidationError::new(
            &spec.name,
            code,
            format!("Field '{}' must be greater than {CARD_YEAR_FLOOR}", spec.name),
        )),
    }
}

fn validate_card_cvv(value: &Value, spec: &FieldSpec) -> Option<ValidationError> {
    card_digits(value, spec, 3, ValidationCode::InvalidCardCvv).err()
}

/// Amount kinds: numeric value, at most two fractional digits in the literal
/// text, then the decimal bounds
fn validate_amount(value: &Value, spec: &FieldSpec, accept_string: bool) -> Option<ValidationError> {
    let parsed = match value {
        Value::Number(n) => number_to_decimal(n)
            .ok_or_else(|| ValidationError::invalid_type(&spec.name, "a valid number")),
        Value::String(s) if accept_string => {
            parse_decimal(s).ok_or_else(|| ValidationError::invalid_type(&spec.name, "a valid number string"))
        }
        _ if accept_string => Err(ValidationError::invalid_type(
            &spec.name,
            "a number or a string containing a number",
        )),
        _ => Err(ValidationError::invalid_type(&spec.name, "a number, not a string")),
    };
    let amount = match parsed {
        Ok(amount) => amount,
        Err(error) => return Some(error),
    };

    // Scale follows the literal: "10.10" has two places, "1e-5" has five.
    if amount.scale() > AMOUNT_SCALE {
        return Some(ValidationError::new(
            &spec.name,
            ValidationCode::TooManyDecimalPlaces,
            format!(
                "Field '{}' must have no more than {AMOUNT_SCALE} decimal places",
                spec.name
            ),
        ));
    }

    check_bounds(amount, spec.min, spec.max, spec)
}
