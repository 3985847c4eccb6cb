//! Input validation for API requests.
//!
//! This module provides validation functions for API request data,
//! ensuring all inputs meet the required format and constraints.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use super::error::ApiError;

lazy_static! {
    /// Pragmatic email check: something@domain.tld, no spaces
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$"
    ).unwrap();

    /// Phone numbers: optional leading +, digits, spaces, dashes and parentheses
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9][0-9 ()\-]{5,19}$"
    ).unwrap();

    /// Gateway transaction references
    static ref PAYMENT_REFERENCE_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._=\-]{1,100}$"
    ).unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a new password: at least 8 characters with a letter and a digit
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one digit".to_string());
    }

    Ok(())
}

/// Validate a required free-text field such as a name or title
pub fn validate_required_text(value: &str, field_name: &str, max_len: usize) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if trimmed.chars().count() > max_len {
        return Err(format!("{} is too long (max {} characters)", field_name, max_len));
    }

    Ok(())
}

/// Validate a person's name (1-100 characters)
pub fn validate_name(name: &str) -> Result<(), String> {
    validate_required_text(name, "Name", 100)
}

/// Validate a phone number
pub fn validate_phone(phone: &str) -> Result<(), String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err("Phone number is required".to_string());
    }

    if !PHONE_REGEX.is_match(phone) {
        return Err("Invalid phone number format".to_string());
    }

    Ok(())
}

/// Validate a price or other amount of money
pub fn validate_amount(amount: f64, field_name: &str) -> Result<(), String> {
    if !amount.is_finite() {
        return Err(format!("{} must be a number", field_name));
    }

    if amount < 0.0 {
        return Err(format!("{} cannot be negative", field_name));
    }

    Ok(())
}

/// Validate that a value is one of an allowed set (case-sensitive)
pub fn validate_one_of(value: &str, allowed: &[&str], field_name: &str) -> Result<(), String> {
    if !allowed.contains(&value) {
        return Err(format!(
            "Invalid {}. Must be one of: {}",
            field_name,
            allowed.join(", ")
        ));
    }
    Ok(())
}

/// Validate named body measurements
pub fn validate_measurement_data(data: &BTreeMap<String, f64>) -> Result<(), String> {
    for (name, value) in data {
        if name.trim().is_empty() {
            return Err("Measurement names cannot be empty".to_string());
        }
        if !value.is_finite() || *value < 0.0 {
            return Err(format!("Measurement '{}' must be a non-negative number", name));
        }
    }
    Ok(())
}

/// Validate a payment gateway reference
pub fn validate_payment_reference(reference: &str) -> Result<(), String> {
    if reference.trim().is_empty() {
        return Err("Payment reference is required".to_string());
    }

    if !PAYMENT_REFERENCE_REGEX.is_match(reference.trim()) {
        return Err("Invalid payment reference format".to_string());
    }

    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Reject malformed path identifiers before they reach the database
pub fn require_uuid(id: &str, field_name: &str) -> Result<(), ApiError> {
    validate_uuid(id, field_name).map_err(|msg| ApiError::validation_field(field_name, msg))
}

/// Trim an optional free-text field; blank becomes `None`
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("first.last+tag@mail.example.co.uk").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("ada").is_err());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("ada @example.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("secret123").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("12345678").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Ada Lovelace").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+234 801 234 5678").is_ok());
        assert!(validate_phone("08012345678").is_ok());
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("").is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(0.0, "Price").is_ok());
        assert!(validate_amount(5000.0, "Price").is_ok());
        assert!(validate_amount(-1.0, "Price").is_err());
        assert!(validate_amount(f64::NAN, "Price").is_err());
    }

    #[test]
    fn test_validate_one_of() {
        assert!(validate_one_of("Male", &["Male", "Female"], "gender").is_ok());
        let err = validate_one_of("male", &["Male", "Female"], "gender").unwrap_err();
        assert!(err.contains("Male, Female"));
    }

    #[test]
    fn test_validate_measurement_data() {
        let mut data = BTreeMap::new();
        data.insert("chest".to_string(), 96.5);
        assert!(validate_measurement_data(&data).is_ok());
        data.insert("waist".to_string(), -2.0);
        assert!(validate_measurement_data(&data).is_err());
    }

    #[test]
    fn test_validate_payment_reference() {
        assert!(validate_payment_reference("T123456789_abc").is_ok());
        assert!(validate_payment_reference("").is_err());
        assert!(validate_payment_reference("../admin").is_err());
    }

    #[test]
    fn test_normalize_optional() {
        assert_eq!(normalize_optional(Some("  Lagos ".to_string())).as_deref(), Some("Lagos"));
        assert_eq!(normalize_optional(Some("   ".to_string())), None);
        assert_eq!(normalize_optional(None), None);
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "order_id").is_ok());
        assert!(validate_uuid("", "order_id").is_err());
        assert!(validate_uuid("not-a-uuid", "order_id").is_err());
    }
}
