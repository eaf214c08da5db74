//! Test-drive booking lifecycle.
//!
//! A booking is created `pending` and only ever moves along the edges of
//! [`TRANSITIONS`]. `completed` and `cancelled` are terminal. Records are
//! never deleted so that history stays available for reporting.

pub mod rules;
pub mod service;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::Role;

/// Lifecycle status of a test-drive booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Active bookings hold their slot
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            _ => Err(format!(
                "Unknown booking status '{}'. Must be one of: pending, confirmed, completed, cancelled",
                s
            )),
        }
    }
}

/// One edge of the booking state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    /// Whether the owning user may trigger it (administrators may trigger every edge)
    pub owner_may: bool,
}

/// Every permitted status change. Anything else is an invalid transition.
pub const TRANSITIONS: [Transition; 4] = [
    Transition {
        from: BookingStatus::Pending,
        to: BookingStatus::Confirmed,
        owner_may: false,
    },
    Transition {
        from: BookingStatus::Pending,
        to: BookingStatus::Cancelled,
        owner_may: true,
    },
    Transition {
        from: BookingStatus::Confirmed,
        to: BookingStatus::Completed,
        owner_may: false,
    },
    Transition {
        from: BookingStatus::Confirmed,
        to: BookingStatus::Cancelled,
        owner_may: true,
    },
];

/// Look up the edge `from -> to`, if the state machine has one
pub fn find_transition(from: BookingStatus, to: BookingStatus) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

/// The identity attempting a status change
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub user_id: &'a str,
    pub role: Role,
}

impl<'a> Actor<'a> {
    pub fn new(user_id: &'a str, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// Decide whether `actor` may move a booking owned by `owner_id` from `current` to `next`.
///
/// Edges missing from the table are rejected as invalid for every caller,
/// before ownership or role is considered.
pub fn authorize_transition(
    current: BookingStatus,
    next: BookingStatus,
    owner_id: &str,
    actor: &Actor<'_>,
) -> Result<(), BookingError> {
    let transition = find_transition(current, next).ok_or(BookingError::InvalidTransition {
        from: current,
        to: next,
    })?;

    if actor.role == Role::Admin {
        return Ok(());
    }

    if actor.user_id != owner_id {
        return Err(BookingError::Forbidden(
            "You can only change your own bookings".to_string(),
        ));
    }

    if !transition.owner_may {
        return Err(BookingError::Forbidden(format!(
            "Only an administrator can mark a booking as {}",
            next
        )));
    }

    Ok(())
}

/// Per-field validation messages, keyed by the request's JSON field name
pub type FieldErrors = HashMap<String, Vec<String>>;

/// Failures of the booking lifecycle
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Validation failed")]
    Validation(FieldErrors),

    /// The slot already holds an active booking
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Cannot change booking status from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
