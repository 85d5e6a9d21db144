use async_trait::async_trait;
use uuid::Uuid;

use crate::models::Customer;
use crate::repository::StoreResult;

/// Lookup side of the user/identity store.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>>;
}
