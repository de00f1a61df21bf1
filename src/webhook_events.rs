use async_trait::async_trait;

use crate::error::PaymentError;
use crate::transactions::ProviderKind;

/// Ledger of provider deliveries that have already been applied.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn is_event_processed(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<bool, PaymentError>;

    /// Returns `false` when the event was already recorded.
    async fn mark_event_processed(
        &self,
        provider: ProviderKind,
        event_id: &str,
        merchant_transaction_id: Option<&str>,
    ) -> Result<bool, PaymentError>;
}
