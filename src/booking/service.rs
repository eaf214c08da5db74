//! Persistence side of the booking lifecycle.
//!
//! Submissions pre-check the slot with [`rules::has_active_collision`] and
//! then insert with a single autocommit statement. The partial unique index
//! `idx_test_drives_active_slot` decides the race between two sessions and is
//! reported as the same conflict. No read transaction is held across the
//! insert, so a concurrent writer can only cause a busy wait, never a stale
//! snapshot error.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};

use super::rules::{self, DATE_FORMAT};
use super::{authorize_transition, Actor, BookingError, BookingStatus};
use crate::db::{
    now_rfc3339, BookingStats, Car, CarSummary, CreateTestDriveRequest, DbPool, PopularCar,
    TestDrive, TestDriveWithCar, User,
};

fn conflict_message(date: NaiveDate, time: &str) -> String {
    format!(
        "This car is already booked on {} at {}. Please choose another time slot.",
        date.format(DATE_FORMAT),
        time
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Validate and persist a new `pending` booking for `user`.
pub async fn submit_booking(
    pool: &DbPool,
    user: &User,
    request: &CreateTestDriveRequest,
    today: NaiveDate,
    slots: &[String],
) -> Result<TestDrive, BookingError> {
    let slot = rules::validate_request(request, today, slots).map_err(BookingError::Validation)?;

    let car: Option<(String,)> = sqlx::query_as("SELECT id FROM cars WHERE id = ?")
        .bind(&slot.car_id)
        .fetch_optional(pool)
        .await?;
    if car.is_none() {
        return Err(BookingError::NotFound("Car not found".to_string()));
    }

    let date = slot.date.format(DATE_FORMAT).to_string();
    let existing: Vec<TestDrive> = sqlx::query_as(
        "SELECT * FROM test_drives WHERE car_id = ? AND date = ? AND status IN ('pending', 'confirmed')",
    )
    .bind(&slot.car_id)
    .bind(&date)
    .fetch_all(pool)
    .await?;

    if rules::has_active_collision(&slot.car_id, slot.date, &slot.time, &existing) {
        info!(car_id = %slot.car_id, date = %date, time = %slot.time, "Booking rejected, slot taken");
        return Err(BookingError::Conflict(conflict_message(slot.date, &slot.time)));
    }

    let now = now_rfc3339();
    let booking = TestDrive {
        id: uuid::Uuid::new_v4().to_string(),
        car_id: slot.car_id.clone(),
        user_id: user.id.clone(),
        date,
        time: slot.time.clone(),
        customer_name: request.customer_name.trim().to_string(),
        customer_email: request.customer_email.trim().to_string(),
        customer_phone: request.customer_phone.trim().to_string(),
        notes: request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        status: BookingStatus::Pending,
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO test_drives (id, car_id, user_id, date, time, customer_name, customer_email,
                                 customer_phone, notes, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&booking.id)
    .bind(&booking.car_id)
    .bind(&booking.user_id)
    .bind(&booking.date)
    .bind(&booking.time)
    .bind(&booking.customer_name)
    .bind(&booking.customer_email)
    .bind(&booking.customer_phone)
    .bind(&booking.notes)
    .bind(booking.status)
    .bind(&booking.created_at)
    .bind(&booking.updated_at)
    .execute(pool)
    .await;

    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            warn!(car_id = %booking.car_id, date = %booking.date, time = %booking.time, "Concurrent booking lost the slot race");
            return Err(BookingError::Conflict(conflict_message(slot.date, &slot.time)));
        }
        return Err(e.into());
    }

    info!(
        booking_id = %booking.id,
        car_id = %booking.car_id,
        user_id = %booking.user_id,
        date = %booking.date,
        time = %booking.time,
        "Test drive booked"
    );
    Ok(booking)
}

pub async fn get_booking(pool: &DbPool, booking_id: &str) -> Result<TestDrive, BookingError> {
    sqlx::query_as::<_, TestDrive>("SELECT * FROM test_drives WHERE id = ?")
        .bind(booking_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::NotFound("Test drive not found".to_string()))
}

/// Move a booking to `next` on behalf of `actor`.
///
/// The update is conditional on the status read beforehand, so two
/// concurrent changes cannot both apply.
pub async fn change_status(
    pool: &DbPool,
    booking_id: &str,
    next: BookingStatus,
    actor: &Actor<'_>,
) -> Result<TestDrive, BookingError> {
    let booking = get_booking(pool, booking_id).await?;
    authorize_transition(booking.status, next, &booking.user_id, actor)?;

    let now = now_rfc3339();
    let result = sqlx::query(
        "UPDATE test_drives SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(next)
    .bind(&now)
    .bind(booking_id)
    .bind(booking.status)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = get_booking(pool, booking_id).await?;
        return Err(BookingError::InvalidTransition {
            from: current.status,
            to: next,
        });
    }

    info!(
        booking_id = %booking_id,
        from = %booking.status,
        to = %next,
        actor = %actor.user_id,
        "Test drive status changed"
    );

    Ok(TestDrive {
        status: next,
        updated_at: now,
        ..booking
    })
}

async fn attach_cars(
    pool: &DbPool,
    bookings: Vec<TestDrive>,
) -> Result<Vec<TestDriveWithCar>, BookingError> {
    let cars: Vec<Car> = sqlx::query_as("SELECT * FROM cars")
        .fetch_all(pool)
        .await?;
    let cars: HashMap<String, CarSummary> = cars
        .iter()
        .map(|car| (car.id.clone(), CarSummary::from(car)))
        .collect();

    Ok(bookings
        .into_iter()
        .map(|booking| TestDriveWithCar {
            car: cars.get(&booking.car_id).cloned(),
            booking,
        })
        .collect())
}

/// Bookings created by `user_id`, soonest slot first
pub async fn list_for_user(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<TestDriveWithCar>, BookingError> {
    let bookings: Vec<TestDrive> = sqlx::query_as(
        "SELECT * FROM test_drives WHERE user_id = ? ORDER BY date ASC, time ASC, created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    attach_cars(pool, bookings).await
}

/// Every booking, newest first, optionally restricted to one status
pub async fn list_all(
    pool: &DbPool,
    status: Option<BookingStatus>,
) -> Result<Vec<TestDriveWithCar>, BookingError> {
    let bookings: Vec<TestDrive> = match status {
        Some(status) => {
            sqlx::query_as(
                "SELECT * FROM test_drives WHERE status = ? ORDER BY created_at DESC",
            )
            .bind(status)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM test_drives ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?
        }
    };
    attach_cars(pool, bookings).await
}

/// Figures for the administrator overview
pub async fn stats(pool: &DbPool) -> Result<BookingStats, BookingError> {
    let total_cars: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cars")
        .fetch_one(pool)
        .await?;
    let total_users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'user'")
        .fetch_one(pool)
        .await?;
    let by_status: Vec<(BookingStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM test_drives GROUP BY status")
            .fetch_all(pool)
            .await?;
    let popular_cars: Vec<PopularCar> = sqlx::query_as(
        r#"
        SELECT t.car_id AS car_id, c.make || ' ' || c.model AS car, COUNT(*) AS test_drives
        FROM test_drives t
        INNER JOIN cars c ON c.id = t.car_id
        GROUP BY t.car_id
        ORDER BY test_drives DESC, car ASC
        LIMIT 5
        "#,
    )
    .fetch_all(pool)
    .await?;

    let count = |status: BookingStatus| {
        by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };

    Ok(BookingStats {
        total_cars: total_cars.0,
        total_users: total_users.0,
        total_test_drives: by_status.iter().map(|(_, n)| n).sum(),
        pending: count(BookingStatus::Pending),
        confirmed: count(BookingStatus::Confirmed),
        completed: count(BookingStatus::Completed),
        cancelled: count(BookingStatus::Cancelled),
        popular_cars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_time_slots;
    use crate::db::{Role, UserStatus};

    async fn setup() -> (DbPool, Vec<Car>) {
        let pool = crate::db::init_memory().await.unwrap();
        crate::db::seed_demo_cars(&pool).await.unwrap();
        let cars: Vec<Car> = sqlx::query_as("SELECT * FROM cars ORDER BY make")
            .fetch_all(&pool)
            .await
            .unwrap();
        (pool, cars)
    }

    async fn user(pool: &DbPool, email: &str, role: Role) -> User {
        let now = now_rfc3339();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            name: email.split('@').next().unwrap().to_string(),
            email: email.to_string(),
            password_hash: "x".to_string(),
            phone: None,
            role,
            status: UserStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        };
        sqlx::query("INSERT INTO users (id, name, email, password_hash, role) VALUES (?, ?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role)
            .execute(pool)
            .await
            .unwrap();
        user
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
    }

    /// Bypasses every check, straight to the table
    async fn insert_raw(
        pool: &DbPool,
        id: &str,
        car_id: &str,
        user_id: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO test_drives (id, car_id, user_id, date, time, customer_name, customer_email, customer_phone, status, created_at, updated_at)
             VALUES (?, ?, ?, '2025-06-01', '10:00', 'A', 'a@b.co', '1', 'pending', ?, ?)",
        )
        .bind(id)
        .bind(car_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    fn request(car_id: &str) -> CreateTestDriveRequest {
        CreateTestDriveRequest {
            car_id: car_id.to_string(),
            date: "2025-06-01".to_string(),
            time: "10:00".to_string(),
            customer_name: "Ada Lovelace".to_string(),
            customer_email: "ada@example.com".to_string(),
            customer_phone: "555-0100".to_string(),
            notes: Some("  ".to_string()),
        }
    }

    #[tokio::test]
    async fn test_second_booking_for_same_slot_conflicts() {
        let (pool, cars) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let bob = user(&pool, "bob@example.com", Role::User).await;
        let slots = default_time_slots();

        let first = submit_booking(&pool, &ada, &request(&cars[0].id), today(), &slots)
            .await
            .unwrap();
        assert_eq!(first.status, BookingStatus::Pending);
        assert_eq!(first.notes, None);

        let second = submit_booking(&pool, &bob, &request(&cars[0].id), today(), &slots).await;
        match second {
            Err(BookingError::Conflict(message)) => assert!(message.contains("2025-06-01")),
            other => panic!("expected conflict, got {:?}", other),
        }

        // Another car on the same slot is fine
        assert!(submit_booking(&pool, &bob, &request(&cars[1].id), today(), &slots)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_slot_can_be_rebooked() {
        let (pool, cars) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let slots = default_time_slots();

        let first = submit_booking(&pool, &ada, &request(&cars[0].id), today(), &slots)
            .await
            .unwrap();
        change_status(
            &pool,
            &first.id,
            BookingStatus::Cancelled,
            &Actor::new(&ada.id, ada.role),
        )
        .await
        .unwrap();

        let again = submit_booking(&pool, &ada, &request(&cars[0].id), today(), &slots)
            .await
            .unwrap();
        assert_ne!(again.id, first.id);
    }

    #[tokio::test]
    async fn test_unique_index_is_the_final_arbiter() {
        let (pool, cars) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let now = now_rfc3339();

        insert_raw(&pool, "a", &cars[0].id, &ada.id, &now).await.unwrap();
        let err = insert_raw(&pool, "b", &cars[0].id, &ada.id, &now)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_rejects_unknown_car_and_invalid_fields() {
        let (pool, _) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let slots = default_time_slots();

        let missing = submit_booking(&pool, &ada, &request("nope"), today(), &slots).await;
        assert!(matches!(missing, Err(BookingError::NotFound(_))));

        let mut bad = request("nope");
        bad.time = "13:00".to_string();
        let invalid = submit_booking(&pool, &ada, &bad, today(), &slots).await;
        match invalid {
            Err(BookingError::Validation(fields)) => assert!(fields.contains_key("time")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_scenario() {
        let (pool, cars) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let admin = user(&pool, "admin@example.com", Role::Admin).await;
        let slots = default_time_slots();
        let as_admin = Actor::new(&admin.id, admin.role);
        let as_ada = Actor::new(&ada.id, ada.role);

        let booking = submit_booking(&pool, &ada, &request(&cars[0].id), today(), &slots)
            .await
            .unwrap();

        let confirmed = change_status(&pool, &booking.id, BookingStatus::Confirmed, &as_admin)
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);

        let cancelled = change_status(&pool, &booking.id, BookingStatus::Cancelled, &as_ada)
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        let completed = change_status(&pool, &booking.id, BookingStatus::Completed, &as_admin).await;
        assert!(matches!(
            completed,
            Err(BookingError::InvalidTransition {
                from: BookingStatus::Cancelled,
                to: BookingStatus::Completed
            })
        ));

        let stored = get_booking(&pool, &booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_stranger_cannot_cancel_and_status_is_unchanged() {
        let (pool, cars) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let bob = user(&pool, "bob@example.com", Role::User).await;
        let slots = default_time_slots();

        let booking = submit_booking(&pool, &ada, &request(&cars[0].id), today(), &slots)
            .await
            .unwrap();
        let result = change_status(
            &pool,
            &booking.id,
            BookingStatus::Cancelled,
            &Actor::new(&bob.id, bob.role),
        )
        .await;
        assert!(matches!(result, Err(BookingError::Forbidden(_))));

        let stored = get_booking(&pool, &booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_listings_and_stats() {
        let (pool, cars) = setup().await;
        let ada = user(&pool, "ada@example.com", Role::User).await;
        let bob = user(&pool, "bob@example.com", Role::User).await;
        let admin = user(&pool, "admin@example.com", Role::Admin).await;
        let slots = default_time_slots();

        let mut req = request(&cars[0].id);
        let first = submit_booking(&pool, &ada, &req, today(), &slots).await.unwrap();
        req.time = "11:00".to_string();
        submit_booking(&pool, &bob, &req, today(), &slots).await.unwrap();
        let other = submit_booking(&pool, &bob, &request(&cars[1].id), today(), &slots)
            .await
            .unwrap();
        change_status(
            &pool,
            &first.id,
            BookingStatus::Confirmed,
            &Actor::new(&admin.id, admin.role),
        )
        .await
        .unwrap();

        let mine = list_for_user(&pool, &bob.id).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|b| b.booking.user_id == bob.id));
        assert!(mine.iter().all(|b| b.car.is_some()));

        let confirmed = list_all(&pool, Some(BookingStatus::Confirmed)).await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].booking.id, first.id);
        assert_eq!(list_all(&pool, None).await.unwrap().len(), 3);

        let stats = stats(&pool).await.unwrap();
        assert_eq!(stats.total_cars, 5);
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_test_drives, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.popular_cars[0].car_id, cars[0].id);
        assert_eq!(stats.popular_cars[0].test_drives, 2);
        assert_eq!(stats.popular_cars[1].car_id, other.car_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_on_file_pool_lose_with_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init(dir.path()).await.unwrap();
        crate::db::seed_demo_cars(&pool).await.unwrap();
        let car: (String,) = sqlx::query_as("SELECT id FROM cars LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();

        let mut racers = Vec::new();
        for i in 0..5 {
            racers.push(user(&pool, &format!("racer{}@example.com", i), Role::User).await);
        }

        for slot in default_time_slots() {
            let mut handles = Vec::new();
            for racer in &racers {
                let pool = pool.clone();
                let racer = racer.clone();
                let mut request = request(&car.0);
                request.time = slot.clone();
                handles.push(tokio::spawn(async move {
                    submit_booking(&pool, &racer, &request, today(), &default_time_slots()).await
                }));
            }

            let mut booked = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => booked += 1,
                    Err(BookingError::Conflict(_)) => {}
                    Err(other) => panic!("slot {}: expected conflict, got {:?}", slot, other),
                }
            }
            assert_eq!(booked, 1, "slot {}", slot);
        }

        pool.close().await;
    }
}
