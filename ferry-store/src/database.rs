use ferry_core::repository::{StoreError, UniqueField};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::DatabaseConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Translates driver errors into the storage taxonomy the core understands.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(unique_field(db.constraint()))
        }
        sqlx::Error::Database(db) if db.is_check_violation() => {
            StoreError::ConstraintViolation(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::ConstraintViolation(db.message().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn unique_field(constraint: Option<&str>) -> UniqueField {
    match constraint {
        Some("uq_bookings_reference") => UniqueField::BookingReference,
        Some("uq_tickets_qr_code") => UniqueField::TicketCode,
        Some(other) => UniqueField::Other(other.to_string()),
        None => UniqueField::Other("unknown".to_string()),
    }
}

pub(crate) fn parse_column<T>(value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| StoreError::Backend(format!("corrupt column value: {}", e)))
}
