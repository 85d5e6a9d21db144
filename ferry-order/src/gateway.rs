use async_trait::async_trait;
use chrono::Utc;
use ferry_core::payment::{
    ChargeReceipt, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway, RefundReceipt,
    RefundStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Outcome to force on an upcoming charge.
#[derive(Debug, Clone)]
pub enum ScriptedCharge {
    Decline(String),
    /// Sleep before approving.
    Delay(Duration),
    /// Fail without charging.
    Unavailable(String),
    /// Charge succeeds at the provider but the response is lost.
    LostResponse,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<ScriptedCharge>,
    charges: HashMap<String, ChargeReceipt>,
    failing_refunds: u32,
    refunds: Vec<(String, i64)>,
    // idempotency key -> receipt
    refund_keys: HashMap<String, RefundReceipt>,
}

/// Stand-in gateway that approves everything unless told otherwise.
#[derive(Default)]
pub struct MockPaymentGateway {
    state: Mutex<MockState>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock gateway state poisoned".into()))
    }

    /// Queues an outcome for the next charge that has no scripted outcome yet.
    pub fn script(&self, outcome: ScriptedCharge) {
        if let Ok(mut state) = self.state.lock() {
            state.script.push_back(outcome);
        }
    }

    pub fn fail_next_refunds(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_refunds = count;
        }
    }

    pub fn charge_count(&self) -> usize {
        self.state.lock().map(|s| s.charges.len()).unwrap_or(0)
    }

    /// `(transaction id, amount)` of every accepted refund.
    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.state.lock().map(|s| s.refunds.clone()).unwrap_or_default()
    }

    fn record(
        &self,
        request: &ChargeRequest,
        status: ChargeStatus,
        reason: Option<String>,
    ) -> Result<ChargeReceipt, GatewayError> {
        let receipt = ChargeReceipt {
            transaction_id: format!("mock_txn_{}", Uuid::new_v4().simple()),
            status,
            decline_reason: reason,
            processed_at: Utc::now(),
        };
        self.state()?
            .charges
            .insert(request.reference.clone(), receipt.clone());
        Ok(receipt)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let scripted = {
            let mut state = self.state()?;
            // Same reference twice is the same charge
            if let Some(existing) = state.charges.get(&request.reference) {
                return Ok(existing.clone());
            }
            state.script.pop_front()
        };

        match scripted {
            None => self.record(request, ChargeStatus::Succeeded, None),
            Some(ScriptedCharge::Decline(reason)) => {
                self.record(request, ChargeStatus::Declined, Some(reason))
            }
            Some(ScriptedCharge::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                self.record(request, ChargeStatus::Succeeded, None)
            }
            Some(ScriptedCharge::Unavailable(reason)) => Err(GatewayError::Unavailable(reason)),
            Some(ScriptedCharge::LostResponse) => {
                self.record(request, ChargeStatus::Succeeded, None)?;
                Err(GatewayError::Unavailable("connection reset".into()))
            }
        }
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let mut state = self.state()?;
        if state.failing_refunds > 0 {
            state.failing_refunds -= 1;
            return Err(GatewayError::Unavailable("refund service down".into()));
        }
        if let Some(previous) = state.refund_keys.get(idempotency_key) {
            return Ok(previous.clone());
        }
        if !state.charges.values().any(|c| c.transaction_id == transaction_id) {
            return Err(GatewayError::Rejected(format!(
                "unknown transaction {}",
                transaction_id
            )));
        }

        let receipt = RefundReceipt {
            refund_id: format!("mock_rf_{}", Uuid::new_v4().simple()),
            status: RefundStatus::Succeeded,
            processed_at: Utc::now(),
        };
        state.refunds.push((transaction_id.to_string(), amount));
        state
            .refund_keys
            .insert(idempotency_key.to_string(), receipt.clone());
        info!("Mock refund of {} against {}", amount, transaction_id);
        Ok(receipt)
    }

    async fn find_charge(&self, reference: &str) -> Result<Option<ChargeReceipt>, GatewayError> {
        Ok(self.state()?.charges.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(reference: &str) -> ChargeRequest {
        ChargeRequest {
            reference: reference.to_string(),
            amount: 15000,
            currency: "USD".into(),
            method: "card".into(),
        }
    }

    #[tokio::test]
    async fn test_auto_approves_and_is_idempotent_per_reference() {
        let gateway = MockPaymentGateway::new();

        let first = gateway.charge(&request("FFAAAA1111")).await.unwrap();
        let again = gateway.charge(&request("FFAAAA1111")).await.unwrap();
        assert_eq!(first.status, ChargeStatus::Succeeded);
        assert_eq!(first.transaction_id, again.transaction_id);
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_apply_in_order() {
        let gateway = MockPaymentGateway::new();
        gateway.script(ScriptedCharge::Decline("insufficient funds".into()));
        gateway.script(ScriptedCharge::LostResponse);

        let declined = gateway.charge(&request("FFAAAA0001")).await.unwrap();
        assert_eq!(declined.status, ChargeStatus::Declined);

        assert!(gateway.charge(&request("FFAAAA0002")).await.is_err());
        let found = gateway.find_charge("FFAAAA0002").await.unwrap().unwrap();
        assert_eq!(found.status, ChargeStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_refund_failures_then_success() {
        let gateway = MockPaymentGateway::new();
        let receipt = gateway.charge(&request("FFAAAA0003")).await.unwrap();
        gateway.fail_next_refunds(1);

        assert!(gateway.refund(&receipt.transaction_id, 15000, "rf-1").await.is_err());
        assert!(gateway.refund(&receipt.transaction_id, 15000, "rf-1").await.is_ok());
        assert_eq!(gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_refund_key_moves_money_once() {
        let gateway = MockPaymentGateway::new();
        let receipt = gateway.charge(&request("FFAAAA0004")).await.unwrap();

        let first = gateway.refund(&receipt.transaction_id, 15000, "rf-2").await.unwrap();
        let again = gateway.refund(&receipt.transaction_id, 15000, "rf-2").await.unwrap();
        assert_eq!(first.refund_id, again.refund_id);
        assert_eq!(gateway.refunds(), vec![(receipt.transaction_id.clone(), 15000)]);

        gateway.refund(&receipt.transaction_id, 15000, "rf-3").await.unwrap();
        assert_eq!(gateway.refunds().len(), 2);
    }
}
