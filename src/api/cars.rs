use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::error::ApiError;
use crate::db::{Car, CarResponse};
use crate::AppState;

/// Read-only catalog listing
pub async fn list_cars(State(state): State<Arc<AppState>>) -> Result<Json<Vec<CarResponse>>, ApiError> {
    let cars: Vec<Car> = sqlx::query_as("SELECT * FROM cars ORDER BY make ASC, model ASC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(cars.into_iter().map(CarResponse::from).collect()))
}

pub async fn get_car(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CarResponse>, ApiError> {
    let car: Option<Car> = sqlx::query_as("SELECT * FROM cars WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;

    car.map(|car| Json(CarResponse::from(car)))
        .ok_or_else(|| ApiError::not_found("Car not found"))
}
