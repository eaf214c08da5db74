use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::auth::require_capability;
use super::error::ApiError;
use crate::booking::{service, Actor, BookingStatus};
use crate::db::{
    BookingStats, CreateTestDriveRequest, TestDrive, TestDriveQuery, TestDriveWithCar,
    UpdateTestDriveStatusRequest, User,
};
use crate::policy::Capability;
use crate::AppState;

/// Dates are compared against the dealership's local calendar
fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn parse_status(status: &str) -> Result<BookingStatus, ApiError> {
    status
        .parse()
        .map_err(|e: String| ApiError::validation_field("status", e))
}

/// Book a test drive
pub async fn create_test_drive(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<CreateTestDriveRequest>,
) -> Result<(StatusCode, Json<TestDrive>), ApiError> {
    require_capability(&user, Capability::BookTestDrive)?;

    let booking = service::submit_booking(
        &state.db,
        &user,
        &request,
        today(),
        &state.config.booking.time_slots,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// The caller's own bookings
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<TestDriveWithCar>>, ApiError> {
    require_capability(&user, Capability::ViewOwnBookings)?;
    Ok(Json(service::list_for_user(&state.db, &user.id).await?))
}

/// Every booking (admin), optionally filtered by `?status=`
pub async fn list_all(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<TestDriveQuery>,
) -> Result<Json<Vec<TestDriveWithCar>>, ApiError> {
    require_capability(&user, Capability::ManageBookings)?;

    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(status) => Some(parse_status(status)?),
    };
    Ok(Json(service::list_all(&state.db, status).await?))
}

/// Move a booking along the lifecycle (admin)
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(request): Json<UpdateTestDriveStatusRequest>,
) -> Result<Json<TestDrive>, ApiError> {
    require_capability(&user, Capability::ManageBookings)?;
    let next = parse_status(&request.status)?;

    let booking =
        service::change_status(&state.db, &id, next, &Actor::new(&user.id, user.role)).await?;
    Ok(Json(booking))
}

/// Cancel a booking; owners may cancel their own pending or confirmed bookings
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<TestDrive>, ApiError> {
    let booking = service::change_status(
        &state.db,
        &id,
        BookingStatus::Cancelled,
        &Actor::new(&user.id, user.role),
    )
    .await?;
    Ok(Json(booking))
}

/// Counts per status and the most booked cars (admin)
pub async fn stats(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<BookingStats>, ApiError> {
    require_capability(&user, Capability::ViewReports)?;
    Ok(Json(service::stats(&state.db).await?))
}
