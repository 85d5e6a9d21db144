use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::models::{Schedule, ScheduleStatus};
use ferry_core::repository::{ScheduleRepository, SeatCounts, StoreError, StoreResult};
use ferry_core::search::ScheduleSearch;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{parse_column, store_error};

pub struct PgScheduleRepository {
    pool: PgPool,
}

impl PgScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    route_id: Uuid,
    vessel_id: Uuid,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
    base_fare: i64,
    currency: String,
    total_capacity: i32,
    available_seats: i32,
    status: String,
    cancellation_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(Schedule {
            id: row.id,
            route_id: row.route_id,
            vessel_id: row.vessel_id,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            base_fare: row.base_fare,
            currency: row.currency,
            total_capacity: row.total_capacity,
            available_seats: row.available_seats,
            status: parse_column::<ScheduleStatus>(&row.status)?,
            cancellation_reason: row.cancellation_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SCHEDULE_COLUMNS: &str = r#"
    s.id, s.route_id, s.vessel_id, s.departure_time, s.arrival_time, s.base_fare, s.currency,
    s.total_capacity, s.available_seats, s.status, s.cancellation_reason, s.version,
    s.created_at, s.updated_at
"#;

const SEARCH_FILTER: &str = r#"
    FROM schedules s
    JOIN routes r ON s.route_id = r.id
    WHERE r.departure_port_id = $1
      AND r.arrival_port_id = $2
      AND DATE(s.departure_time AT TIME ZONE 'UTC') = $3
      AND s.status = 'scheduled'
      AND s.available_seats >= $4
"#;

#[async_trait]
impl ScheduleRepository for PgScheduleRepository {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                id, route_id, vessel_id, departure_time, arrival_time, base_fare, currency,
                total_capacity, available_seats, status, cancellation_reason, version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.route_id)
        .bind(schedule.vessel_id)
        .bind(schedule.departure_time)
        .bind(schedule.arrival_time)
        .bind(schedule.base_fare)
        .bind(&schedule.currency)
        .bind(schedule.total_capacity)
        .bind(schedule.available_seats)
        .bind(schedule.status.as_str())
        .bind(&schedule.cancellation_reason)
        .bind(schedule.version)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        let row: Option<ScheduleRow> =
            sqlx::query_as(&format!("SELECT {} FROM schedules s WHERE s.id = $1", SCHEDULE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        row.map(Schedule::try_from).transpose()
    }

    async fn compare_and_set_seats(
        &self,
        id: Uuid,
        expected_version: i64,
        available_seats: i32,
    ) -> StoreResult<Option<i64>> {
        // The CHECK constraint on schedules rejects values outside 0..=total_capacity.
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE schedules
            SET available_seats = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(available_seats)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(version)
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<SeatCounts>> {
        // No version guard: the increment is relative and bounded by capacity.
        let counts: Option<(i32, i32, i64)> = sqlx::query_as(
            r#"
            UPDATE schedules
            SET available_seats = available_seats + $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND available_seats + $2 <= total_capacity
            RETURNING available_seats, total_capacity, version
            "#,
        )
        .bind(id)
        .bind(seats)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(counts.map(|(available_seats, total_capacity, version)| SeatCounts {
            available_seats,
            total_capacity,
            version,
        }))
    }

    async fn update_schedule(
        &self,
        schedule: &Schedule,
        expected_version: i64,
    ) -> StoreResult<Option<i64>> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE schedules
            SET departure_time = $3,
                arrival_time = $4,
                base_fare = $5,
                status = $6,
                cancellation_reason = $7,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(schedule.id)
        .bind(expected_version)
        .bind(schedule.departure_time)
        .bind(schedule.arrival_time)
        .bind(schedule.base_fare)
        .bind(schedule.status.as_str())
        .bind(&schedule.cancellation_reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(version)
    }

    async fn delete_schedule(&self, id: Uuid) -> StoreResult<bool> {
        // ON DELETE RESTRICT on bookings turns a referenced schedule into a
        // foreign key violation.
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn search_schedules(
        &self,
        criteria: &ScheduleSearch,
    ) -> StoreResult<(Vec<Schedule>, i64)> {
        let (limit, offset) = criteria.page();
        let passengers = criteria.passengers.max(1);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", SEARCH_FILTER))
            .bind(criteria.departure_port)
            .bind(criteria.arrival_port)
            .bind(criteria.date)
            .bind(passengers)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

        let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {} {} ORDER BY s.departure_time ASC, s.id ASC LIMIT $5 OFFSET $6",
            SCHEDULE_COLUMNS, SEARCH_FILTER
        ))
        .bind(criteria.departure_port)
        .bind(criteria.arrival_port)
        .bind(criteria.date)
        .bind(passengers)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let schedules = rows
            .into_iter()
            .map(Schedule::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((schedules, total))
    }
}
