//! Car catalog models. The catalog is read-only through this service.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::parse_string_list;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Car {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i64,
    pub price: f64,
    pub fuel_type: String,
    pub seating: i64,
    /// JSON array of image URLs
    pub images: String,
    /// JSON array of feature labels
    pub features: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarResponse {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i64,
    pub price: f64,
    pub fuel_type: String,
    pub seating: i64,
    pub images: Vec<String>,
    pub features: Vec<String>,
}

impl From<Car> for CarResponse {
    fn from(car: Car) -> Self {
        Self {
            images: parse_string_list(Some(&car.images)),
            features: parse_string_list(Some(&car.features)),
            id: car.id,
            make: car.make,
            model: car.model,
            year: car.year,
            price: car.price,
            fuel_type: car.fuel_type,
            seating: car.seating,
        }
    }
}

/// Short form embedded in booking listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarSummary {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i64,
}

impl CarSummary {
    pub fn display_name(&self) -> String {
        format!("{} {} ({})", self.make, self.model, self.year)
    }
}

impl From<&Car> for CarSummary {
    fn from(car: &Car) -> Self {
        Self {
            id: car.id.clone(),
            make: car.make.clone(),
            model: car.model.clone(),
            year: car.year,
        }
    }
}
