pub mod app_config;
pub mod booking_repo;
pub mod catalog_repo;
pub mod database;
pub mod events;
pub mod memory;
pub mod redis_repo;
pub mod schedule_repo;

use ferry_core::identity::CustomerDirectory;
use ferry_core::repository::{BookingRepository, CatalogRepository, ScheduleRepository};
use sqlx::PgPool;
use std::sync::Arc;

pub use app_config::{Config, StorageBackend};
pub use booking_repo::PgBookingRepository;
pub use catalog_repo::{PgCatalogRepository, PgCustomerDirectory};
pub use database::DbClient;
pub use events::EventBus;
pub use memory::MemoryStore;
pub use redis_repo::RedisClient;
pub use schedule_repo::PgScheduleRepository;

/// The repository handles the services are wired with, whichever backend
/// serves them.
#[derive(Clone)]
pub struct Repositories {
    pub schedules: Arc<dyn ScheduleRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub customers: Arc<dyn CustomerDirectory>,
}

impl Repositories {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            schedules: store.clone(),
            bookings: store.clone(),
            catalog: store.clone(),
            customers: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            schedules: Arc::new(PgScheduleRepository::new(pool.clone())),
            bookings: Arc::new(PgBookingRepository::new(pool.clone())),
            catalog: Arc::new(PgCatalogRepository::new(pool.clone())),
            customers: Arc::new(PgCustomerDirectory::new(pool)),
        }
    }
}
