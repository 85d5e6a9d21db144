use async_trait::async_trait;
use ferry_core::identity::CustomerDirectory;
use ferry_core::models::{Customer, Route, Vessel};
use ferry_core::repository::{CatalogRepository, StoreResult};
use ferry_shared::Masked;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::store_error;

/// Routes and vessels. Ports are plain ids; their names live elsewhere.
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_route(&self, route: &Route) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO routes (id, name, departure_port_id, arrival_port_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(route.id)
        .bind(&route.name)
        .bind(route.departure_port_id)
        .bind(route.arrival_port_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    pub async fn insert_vessel(&self, vessel: &Vessel) -> StoreResult<()> {
        sqlx::query("INSERT INTO vessels (id, name, capacity) VALUES ($1, $2, $3)")
            .bind(vessel.id)
            .bind(&vessel.name)
            .bind(vessel.capacity)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RouteRow {
    id: Uuid,
    name: String,
    departure_port_id: Uuid,
    arrival_port_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct VesselRow {
    id: Uuid,
    name: String,
    capacity: i32,
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn get_route(&self, id: Uuid) -> StoreResult<Option<Route>> {
        let row: Option<RouteRow> = sqlx::query_as(
            "SELECT id, name, departure_port_id, arrival_port_id FROM routes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|r| Route {
            id: r.id,
            name: r.name,
            departure_port_id: r.departure_port_id,
            arrival_port_id: r.arrival_port_id,
        }))
    }

    async fn get_vessel(&self, id: Uuid) -> StoreResult<Option<Vessel>> {
        let row: Option<VesselRow> =
            sqlx::query_as("SELECT id, name, capacity FROM vessels WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(row.map(|r| Vessel {
            id: r.id,
            name: r.name,
            capacity: r.capacity,
        }))
    }
}

pub struct PgCustomerDirectory {
    pool: PgPool,
}

impl PgCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    full_name: String,
    email: String,
    phone: Option<String>,
}

#[async_trait]
impl CustomerDirectory for PgCustomerDirectory {
    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        let row: Option<CustomerRow> =
            sqlx::query_as("SELECT id, full_name, email, phone FROM customers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(row.map(|r| Customer {
            id: r.id,
            full_name: r.full_name,
            email: Masked(r.email),
            phone: r.phone.map(Masked),
        }))
    }
}
