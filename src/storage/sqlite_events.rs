use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::error::PaymentError;
use crate::rate_limit::RateLimitStore;
use crate::storage::sqlite::SqliteStore;
use crate::storage::time::to_storage_string;
use crate::transactions::ProviderKind;
use crate::webhook_events::EventStore;

#[async_trait]
impl EventStore for SqliteStore {
    async fn is_event_processed(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<bool, PaymentError> {
        let conn = self.connection.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_events WHERE provider = ?1 AND event_id = ?2",
                rusqlite::params![provider.as_str(), event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn mark_event_processed(
        &self,
        provider: ProviderKind,
        event_id: &str,
        merchant_transaction_id: Option<&str>,
    ) -> Result<bool, PaymentError> {
        let conn = self.connection.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed_events (provider, event_id, merchant_transaction_id, processed_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                provider.as_str(),
                event_id,
                merchant_transaction_id,
                to_storage_string(&Utc::now()),
            ],
        )?;
        Ok(inserted == 1)
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn hit(&self, key: &str, window_start: i64) -> Result<i64, PaymentError> {
        let conn = self.connection.lock().await;
        let count = conn.query_row(
            "INSERT INTO rate_limits (key, window_start, count) VALUES (?1, ?2, 1)
             ON CONFLICT (key) DO UPDATE SET
                 count = CASE WHEN rate_limits.window_start = excluded.window_start
                              THEN rate_limits.count + 1 ELSE 1 END,
                 window_start = excluded.window_start
             RETURNING count",
            rusqlite::params![key, window_start],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
