//! Input validation for account requests.
//!
//! Booking fields are validated by `booking::rules`; this module covers
//! registration, profile updates and path identifiers. Errors are collected
//! with `ValidationErrorBuilder` so a client sees every bad field at once.

use super::error::{ApiError, ValidationErrorBuilder};
use crate::booking::rules::{validate_email, validate_name, validate_phone};
use crate::db::{RegisterRequest, UpdateProfileRequest};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password is too long (max {} characters)",
            MAX_PASSWORD_LENGTH
        ));
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one digit".to_string());
    }

    Ok(())
}

/// Validate a UUID identifier taken from the request path
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("{} must be a valid UUID", field_name));
    }

    Ok(())
}

pub fn validate_register(request: &RegisterRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&request.name));
    errors.check("email", validate_email(&request.email));
    errors.check("password", validate_password(&request.password));
    if let Some(phone) = request.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        errors.check("phone", validate_phone(phone));
    }
    errors.finish()
}

/// Fields that are present must be valid; a blank phone clears the number
pub fn validate_profile(request: &UpdateProfileRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.name {
        errors.check("name", validate_name(name));
    }
    if let Some(email) = &request.email {
        errors.check("email", validate_email(email));
    }
    if let Some(phone) = request.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        errors.check("phone", validate_phone(phone));
    }
    errors.finish()
}
