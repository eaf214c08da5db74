//! Pure checks applied to a test-drive request before it is persisted.
//!
//! The same rules run in the client (as an optimistic pre-check) and in the
//! server, where the partial unique index on active slots has the final say.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use super::FieldErrors;
use crate::db::{CreateTestDriveRequest, TestDrive};

/// Calendar dates travel as `YYYY-MM-DD`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;
const MAX_PHONE_LEN: usize = 32;
const MAX_NOTES_LEN: usize = 1000;

lazy_static! {
    /// Deliberately loose: one `@`, no whitespace, a dot in the domain part
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// A request that passed validation, with its date parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSlot {
    pub car_id: String,
    pub date: NaiveDate,
    pub time: String,
}

/// True iff an existing booking for the same car, date and time is still active.
pub fn has_active_collision(
    car_id: &str,
    date: NaiveDate,
    time: &str,
    existing: &[TestDrive],
) -> bool {
    let date = date.format(DATE_FORMAT).to_string();
    existing.iter().any(|booking| {
        booking.car_id == car_id
            && booking.date == date
            && booking.time == time
            && booking.status.is_active()
    })
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(format!("Email is too long (max {} characters)", MAX_EMAIL_LEN));
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name is too long (max {} characters)", MAX_NAME_LEN));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err("Phone number is required".to_string());
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(format!(
            "Phone number is too long (max {} characters)",
            MAX_PHONE_LEN
        ));
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` date that must fall strictly after `today`
pub fn validate_date(date: &str, today: NaiveDate) -> Result<NaiveDate, String> {
    if date.trim().is_empty() {
        return Err("Date is required".to_string());
    }
    let parsed = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|_| "Invalid date format. Use YYYY-MM-DD".to_string())?;
    if parsed <= today {
        return Err("Test drives must be booked for a future date".to_string());
    }
    Ok(parsed)
}

pub fn validate_time(time: &str, slots: &[String]) -> Result<(), String> {
    if time.is_empty() {
        return Err("Time is required".to_string());
    }
    if !slots.iter().any(|slot| slot == time) {
        return Err(format!(
            "Invalid time slot. Must be one of: {}",
            slots.join(", ")
        ));
    }
    Ok(())
}

/// Check every field of a booking request, collecting all problems at once.
pub fn validate_request(
    request: &CreateTestDriveRequest,
    today: NaiveDate,
    slots: &[String],
) -> Result<ValidSlot, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut add = |field: &str, message: String| {
        errors.entry(field.to_string()).or_default().push(message);
    };

    if request.car_id.trim().is_empty() {
        add("carId", "Car is required".to_string());
    }

    let date = match validate_date(&request.date, today) {
        Ok(date) => Some(date),
        Err(e) => {
            add("date", e);
            None
        }
    };

    if let Err(e) = validate_time(&request.time, slots) {
        add("time", e);
    }
    if let Err(e) = validate_name(&request.customer_name) {
        add("customerName", e);
    }
    if let Err(e) = validate_email(&request.customer_email) {
        add("customerEmail", e);
    }
    if let Err(e) = validate_phone(&request.customer_phone) {
        add("customerPhone", e);
    }
    if let Some(notes) = &request.notes {
        if notes.chars().count() > MAX_NOTES_LEN {
            add(
                "notes",
                format!("Notes are too long (max {} characters)", MAX_NOTES_LEN),
            );
        }
    }

    match date {
        Some(date) if errors.is_empty() => Ok(ValidSlot {
            car_id: request.car_id.trim().to_string(),
            date,
            time: request.time.clone(),
        }),
        _ => Err(errors),
    }
}
