//! Database seeders for built-in data

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use super::models::{now_rfc3339, serialize_string_list};

/// Insert a small demo catalog when no cars exist yet. Returns the number inserted.
pub async fn seed_demo_cars(pool: &SqlitePool) -> Result<usize> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cars")
        .fetch_one(pool)
        .await?;
    if count.0 > 0 {
        return Ok(0);
    }

    info!("Seeding demo car catalog...");

    // Format: (make, model, year, price, fuel_type, seating, features)
    let cars: Vec<(&str, &str, i64, f64, &str, i64, [&str; 2])> = vec![
        ("Toyota", "Camry", 2024, 28_400.0, "hybrid", 5, ["Adaptive cruise", "Lane assist"]),
        ("Honda", "CR-V", 2023, 32_150.0, "petrol", 5, ["AWD", "Apple CarPlay"]),
        ("Tesla", "Model 3", 2024, 40_240.0, "electric", 5, ["Autopilot", "Glass roof"]),
        ("Ford", "F-150", 2023, 36_770.0, "petrol", 6, ["Tow package", "Bed liner"]),
        ("BMW", "X5", 2024, 65_200.0, "diesel", 7, ["Panoramic roof", "Heated seats"]),
    ];

    let now = now_rfc3339();
    for (make, model, year, price, fuel_type, seating, features) in &cars {
        let features: Vec<String> = features.iter().map(|f| f.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO cars (id, make, model, year, price, fuel_type, seating, images, features, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, '[]', ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(make)
        .bind(model)
        .bind(year)
        .bind(price)
        .bind(fuel_type)
        .bind(seating)
        .bind(serialize_string_list(&features))
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    info!(count = cars.len(), "Demo cars seeded");
    Ok(cars.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeds_once() {
        let pool = crate::db::init_memory().await.unwrap();
        assert_eq!(seed_demo_cars(&pool).await.unwrap(), 5);
        assert_eq!(seed_demo_cars(&pool).await.unwrap(), 0);

        let cars: Vec<crate::db::Car> = sqlx::query_as("SELECT * FROM cars")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(cars.len(), 5);
        let tesla = cars.iter().find(|c| c.make == "Tesla").unwrap();
        let response = crate::db::CarResponse::from(tesla.clone());
        assert_eq!(response.features, vec!["Autopilot", "Glass roof"]);
    }
}
