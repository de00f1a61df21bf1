use async_trait::async_trait;
use serde::Serialize;

use crate::error::PaymentError;

/// Per-user credit counters. A user without a row has zero of both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditLedger {
    pub user_id: String,
    pub total_credit: i64,
    pub used_credit: i64,
}

impl CreditLedger {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_credit: 0,
            used_credit: 0,
        }
    }

    pub fn remaining(&self) -> i64 {
        (self.total_credit - self.used_credit).max(0)
    }
}

#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn get_ledger(&self, user_id: &str) -> Result<CreditLedger, PaymentError>;

    /// Spends one credit. Fails with `InsufficientCredits` instead of letting
    /// the balance go negative.
    async fn consume_credit(&self, user_id: &str) -> Result<CreditLedger, PaymentError>;

    /// Atomically adds `amount` to `total_credit`, creating the row if needed.
    async fn grant_credits(&self, user_id: &str, amount: i64)
    -> Result<CreditLedger, PaymentError>;
}
