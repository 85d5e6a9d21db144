use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Succeeded,
    Declined,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Booking reference, doubles as the idempotency key at the gateway.
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub transaction_id: String,
    pub status: ChargeStatus,
    pub decline_reason: Option<String>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: RefundStatus,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment gateway rejected request: {0}")]
    Rejected(String),
}

/// Payment provider boundary. A declined charge is a successful call with
/// `ChargeStatus::Declined`; an `Err` means the outcome is unknown.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError>;

    /// Refunds part or all of a charge. A repeated `idempotency_key` returns
    /// the first refund's receipt instead of moving money again.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, GatewayError>;

    /// Looks up a previous charge by booking reference.
    async fn find_charge(&self, reference: &str) -> Result<Option<ChargeReceipt>, GatewayError>;
}
