use async_trait::async_trait;
use chrono::Utc;

use crate::credits::{CreditLedger, CreditStore};
use crate::error::PaymentError;
use crate::storage::postgres::PgStore;

fn ledger_from(user_id: &str, row: &tokio_postgres::Row) -> Result<CreditLedger, PaymentError> {
    Ok(CreditLedger {
        user_id: user_id.to_string(),
        total_credit: row.try_get(0)?,
        used_credit: row.try_get(1)?,
    })
}

#[async_trait]
impl CreditStore for PgStore {
    async fn get_ledger(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                "SELECT total_credit, used_credit FROM credits WHERE id = $1",
                &[&user_id],
            )
            .await?;
        match row {
            Some(row) => ledger_from(user_id, &row),
            None => Ok(CreditLedger::empty(user_id)),
        }
    }

    async fn consume_credit(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                "UPDATE credits
                 SET used_credit = used_credit + 1, updated_at = $2
                 WHERE id = $1 AND total_credit - used_credit > 0
                 RETURNING total_credit, used_credit",
                &[&user_id, &Utc::now()],
            )
            .await?;
        match row {
            Some(row) => ledger_from(user_id, &row),
            None => Err(PaymentError::InsufficientCredits),
        }
    }

    async fn grant_credits(
        &self,
        user_id: &str,
        amount: i64,
    ) -> Result<CreditLedger, PaymentError> {
        if amount < 0 {
            return Err(PaymentError::Validation(
                "credit grant must not be negative".into(),
            ));
        }
        let client = self.pool.pick();
        let row = client
            .query_one(
                "INSERT INTO credits (id, total_credit, used_credit, updated_at)
                 VALUES ($1, $2, 0, $3)
                 ON CONFLICT (id) DO UPDATE SET
                     total_credit = credits.total_credit + EXCLUDED.total_credit,
                     updated_at = EXCLUDED.updated_at
                 RETURNING total_credit, used_credit",
                &[&user_id, &amount, &Utc::now()],
            )
            .await?;
        ledger_from(user_id, &row)
    }
}
