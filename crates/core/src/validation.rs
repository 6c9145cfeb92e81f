use rust_decimal::Decimal;
use thiserror::Error;

/// Rejection of a request payload, pointing at the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Largest monetary amount accepted anywhere in the API, in NOK.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(10_000_000, 0, 0, false, 0);

/// Trims `value` and enforces a non-empty, bounded length.
pub fn required_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ValidationError::new(
            field,
            format!("must be at most {max_chars} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`] but blank input collapses to `None`.
pub(crate) fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => required_text(field, text, max_chars).map(Some),
    }
}

/// Checks an amount against `[min, MAX_AMOUNT]` with at most two decimals.
pub(crate) fn amount(
    field: &'static str,
    value: Decimal,
    allow_zero: bool,
) -> Result<Decimal, ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new(field, "must not be negative"));
    }
    if value.is_zero() && !allow_zero {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    if value > MAX_AMOUNT {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_AMOUNT}"),
        ));
    }
    if value.normalize().scale() > 2 {
        return Err(ValidationError::new(field, "must have at most two decimals"));
    }
    Ok(value)
}
