pub mod events;
pub mod identity;
pub mod models;
pub mod payment;
pub mod repository;
pub mod search;

use uuid::Uuid;

pub use repository::{StoreError, StoreResult, UniqueField};

/// Errors surfaced by the booking core. The API layer maps each variant to a
/// status code; `Conflict` is the only one a client should blindly retry.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("Concurrent update conflict on {entity} {id} after {attempts} attempts")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        attempts: u32,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Payment failed for booking {booking_reference}: {reason}")]
    PaymentFailed {
        booking_id: Uuid,
        booking_reference: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Conflict { .. } | CoreError::Store(StoreError::Backend(_))
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let conflict = CoreError::Conflict {
            entity: "schedule",
            id: Uuid::new_v4(),
            attempts: 3,
        };
        assert!(conflict.is_retryable());
        assert!(CoreError::Store(StoreError::Backend("pool timed out".into())).is_retryable());

        assert!(!CoreError::InvalidState("already cancelled".into()).is_retryable());
        assert!(!CoreError::InsufficientCapacity { requested: 4, available: 2 }.is_retryable());
        assert!(!CoreError::Store(StoreError::Duplicate(UniqueField::BookingReference)).is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = CoreError::not_found("ticket", "QR-123");
        assert_eq!(err.to_string(), "ticket not found: QR-123");
    }
}
