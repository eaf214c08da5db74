//! Booking calls made on behalf of the current session.

use reqwest::Method;
use std::sync::Arc;

use super::session::NO_BODY;
use super::{Failure, SessionManager};
use crate::booking::rules::{self, DATE_FORMAT};
use crate::booking::BookingStatus;
use crate::config::default_time_slots;
use crate::db::{
    BookingStats, CarResponse, CreateTestDriveRequest, TestDrive, TestDriveWithCar,
    UpdateTestDriveStatusRequest,
};

pub struct BookingClient {
    session: Arc<SessionManager>,
    time_slots: Vec<String>,
}

impl BookingClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            time_slots: default_time_slots(),
        }
    }

    /// Use the dealership's slot list instead of the default one
    pub fn with_time_slots(mut self, time_slots: Vec<String>) -> Self {
        self.time_slots = time_slots;
        self
    }

    pub fn time_slots(&self) -> &[String] {
        &self.time_slots
    }

    pub async fn cars(&self) -> Result<Vec<CarResponse>, Failure> {
        self.session.api().get_public("/api/cars").await
    }

    pub async fn car(&self, car_id: &str) -> Result<CarResponse, Failure> {
        self.session
            .api()
            .get_public(&format!("/api/cars/{}", car_id))
            .await
    }

    /// Submit a booking request.
    ///
    /// The request is validated locally and checked against `known` bookings
    /// before anything is sent. The local collision check is only a
    /// shortcut: the server decides, and its conflict answer is final.
    pub async fn submit(
        &self,
        request: &CreateTestDriveRequest,
        known: &[TestDrive],
    ) -> Result<TestDrive, Failure> {
        if self.session.snapshot().identity().is_none() {
            return Err(Failure::Authentication(
                "Please log in to book a test drive".to_string(),
            ));
        }

        let today = chrono::Local::now().date_naive();
        let slot = rules::validate_request(request, today, &self.time_slots)
            .map_err(Failure::validation)?;

        if rules::has_active_collision(&slot.car_id, slot.date, &slot.time, known) {
            return Err(Failure::Conflict(format!(
                "This car is already booked on {} at {}. Please choose another time slot.",
                slot.date.format(DATE_FORMAT),
                slot.time
            )));
        }

        let booking: TestDrive = self
            .session
            .mutate(Method::POST, "/api/test-drives", Some(request), true)
            .await?;
        tracing::info!(booking_id = %booking.id, car_id = %booking.car_id, "Test drive requested");
        Ok(booking)
    }

    pub async fn my_bookings(&self) -> Result<Vec<TestDriveWithCar>, Failure> {
        self.session
            .get_authorized("/api/test-drives/my-bookings")
            .await
    }

    /// Every booking (administrators), optionally restricted to one status
    pub async fn all_bookings(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<Vec<TestDriveWithCar>, Failure> {
        let path = match status {
            Some(status) => format!("/api/test-drives/admin/all?status={}", status),
            None => "/api/test-drives/admin/all".to_string(),
        };
        self.session.get_authorized(&path).await
    }

    pub async fn set_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
    ) -> Result<TestDrive, Failure> {
        let body = UpdateTestDriveStatusRequest {
            status: status.to_string(),
        };
        self.session
            .mutate(
                Method::PATCH,
                &format!("/api/test-drives/admin/{}/status", booking_id),
                Some(&body),
                true,
            )
            .await
    }

    /// Cancel one of the caller's bookings
    pub async fn cancel(&self, booking_id: &str) -> Result<TestDrive, Failure> {
        self.session
            .mutate(
                Method::PATCH,
                &format!("/api/test-drives/{}/cancel", booking_id),
                NO_BODY,
                true,
            )
            .await
    }

    pub async fn stats(&self) -> Result<BookingStats, Failure> {
        self.session
            .get_authorized("/api/test-drives/admin/stats")
            .await
    }
}
