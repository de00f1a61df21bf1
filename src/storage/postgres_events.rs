use async_trait::async_trait;
use chrono::Utc;

use crate::error::PaymentError;
use crate::rate_limit::RateLimitStore;
use crate::storage::postgres::PgStore;
use crate::transactions::ProviderKind;
use crate::webhook_events::EventStore;

#[async_trait]
impl EventStore for PgStore {
    async fn is_event_processed(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<bool, PaymentError> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                "SELECT 1 FROM processed_events WHERE provider = $1 AND event_id = $2",
                &[&provider.as_str(), &event_id],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn mark_event_processed(
        &self,
        provider: ProviderKind,
        event_id: &str,
        merchant_transaction_id: Option<&str>,
    ) -> Result<bool, PaymentError> {
        let client = self.pool.pick();
        let inserted = client
            .execute(
                "INSERT INTO processed_events (provider, event_id, merchant_transaction_id, processed_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (provider, event_id) DO NOTHING",
                &[
                    &provider.as_str(),
                    &event_id,
                    &merchant_transaction_id,
                    &Utc::now(),
                ],
            )
            .await?;
        Ok(inserted == 1)
    }
}

#[async_trait]
impl RateLimitStore for PgStore {
    async fn hit(&self, key: &str, window_start: i64) -> Result<i64, PaymentError> {
        let client = self.pool.pick();
        let row = client
            .query_one(
                "INSERT INTO rate_limits (key, window_start, count) VALUES ($1, $2, 1)
                 ON CONFLICT (key) DO UPDATE SET
                     count = CASE WHEN rate_limits.window_start = EXCLUDED.window_start
                                  THEN rate_limits.count + 1 ELSE 1 END,
                     window_start = EXCLUDED.window_start
                 RETURNING count",
                &[&key, &window_start],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}
