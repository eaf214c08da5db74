//! Test-drive booking models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::car::CarSummary;
use crate::booking::BookingStatus;

/// A booking row. `date` is `YYYY-MM-DD`, `time` one of the configured slot labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TestDrive {
    pub id: String,
    pub car_id: String,
    pub user_id: String,
    pub date: String,
    pub time: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Booking as listed to users and administrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDriveWithCar {
    #[serde(flatten)]
    pub booking: TestDrive,
    #[serde(default)]
    pub car: Option<CarSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestDriveRequest {
    pub car_id: String,
    pub date: String,
    pub time: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTestDriveStatusRequest {
    pub status: String,
}

/// Filter for the administrator listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestDriveQuery {
    pub status: Option<String>,
}

/// Number of bookings per car, most booked first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PopularCar {
    pub car_id: String,
    pub car: String,
    pub test_drives: i64,
}

/// Administrator overview figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStats {
    pub total_cars: i64,
    pub total_users: i64,
    pub total_test_drives: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub popular_cars: Vec<PopularCar>,
}
