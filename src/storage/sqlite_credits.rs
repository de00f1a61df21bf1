use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::credits::{CreditLedger, CreditStore};
use crate::error::PaymentError;
use crate::storage::sqlite::SqliteStore;
use crate::storage::sqlite_transactions::add_total_credit;
use crate::storage::time::to_storage_string;

fn select_ledger(conn: &Connection, user_id: &str) -> rusqlite::Result<CreditLedger> {
    let row = conn
        .query_row(
            "SELECT total_credit, used_credit FROM credits WHERE id = ?1",
            [user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    Ok(match row {
        Some((total_credit, used_credit)) => CreditLedger {
            user_id: user_id.to_string(),
            total_credit,
            used_credit,
        },
        None => CreditLedger::empty(user_id),
    })
}

#[async_trait]
impl CreditStore for SqliteStore {
    async fn get_ledger(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        let conn = self.connection.lock().await;
        Ok(select_ledger(&conn, user_id)?)
    }

    async fn consume_credit(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        let conn = self.connection.lock().await;
        let changed = conn.execute(
            "UPDATE credits
             SET used_credit = used_credit + 1, updated_at = ?2
             WHERE id = ?1 AND total_credit - used_credit > 0",
            rusqlite::params![user_id, to_storage_string(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(PaymentError::InsufficientCredits);
        }
        Ok(select_ledger(&conn, user_id)?)
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
        let conn = self.connection.lock().await;
        add_total_credit(&conn, user_id, amount, &Utc::now())?;
        Ok(select_ledger(&conn, user_id)?)
    }
}
