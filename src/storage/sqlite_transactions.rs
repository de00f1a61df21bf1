use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, types::Type};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::storage::sqlite::SqliteStore;
use crate::storage::time::{parse_datetime_string, to_storage_string};
use crate::transactions::{
    Currency, NewTransaction, ProviderKind, SettleOutcome, Settlement, TransactionRecord,
    TransactionStatus, TransactionStore, merge_metadata,
};

const TX_COLUMNS: &str = "id, merchant_transaction_id, provider_transaction_id, provider_session_id, \
     provider, user_id, amount, currency, plan_name, status, payment_method, metadata, \
     created_at, updated_at";

fn invalid_text(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.into(), Type::Text)
}

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let provider_s: String = row.get(4)?;
    let currency_s: String = row.get(7)?;
    let status_s: String = row.get(9)?;
    let metadata_s: String = row.get(11)?;
    let created_at_s: String = row.get(12)?;
    let updated_at_s: String = row.get(13)?;

    let provider = ProviderKind::parse(&provider_s).ok_or_else(|| invalid_text(4, "provider"))?;
    let currency = Currency::parse(&currency_s).ok_or_else(|| invalid_text(7, "currency"))?;
    let status = TransactionStatus::parse(&status_s).ok_or_else(|| invalid_text(9, "status"))?;
    let metadata = serde_json::from_str(&metadata_s).map_err(|e| conversion_failure(11, e))?;
    let created_at = parse_datetime_string(&created_at_s).map_err(|e| conversion_failure(12, e))?;
    let updated_at = parse_datetime_string(&updated_at_s).map_err(|e| conversion_failure(13, e))?;

    Ok(TransactionRecord {
        id: row.get(0)?,
        merchant_transaction_id: row.get(1)?,
        provider_transaction_id: row.get(2)?,
        provider_session_id: row.get(3)?,
        provider,
        user_id: row.get(5)?,
        amount: row.get(6)?,
        currency,
        plan_name: row.get(8)?,
        status,
        payment_method: row.get(10)?,
        metadata,
        created_at,
        updated_at,
    })
}

fn select_record(
    conn: &Connection,
    merchant_transaction_id: &str,
) -> rusqlite::Result<Option<TransactionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM transactions WHERE merchant_transaction_id = ?1",
            TX_COLUMNS
        ),
        [merchant_transaction_id],
        row_to_record,
    )
    .optional()
}

/// `total_credit = total_credit + amount`, creating the ledger row on first grant.
pub(crate) fn add_total_credit(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    now: &DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO credits (id, total_credit, used_credit, updated_at)
         VALUES (?1, ?2, 0, ?3)
         ON CONFLICT (id) DO UPDATE SET
             total_credit = total_credit + excluded.total_credit,
             updated_at = excluded.updated_at",
        rusqlite::params![user_id, amount, to_storage_string(now)],
    )?;
    Ok(())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, PaymentError> {
        let now = Utc::now();
        let record = TransactionRecord {
            id: Uuid::new_v4().to_string(),
            merchant_transaction_id: new.merchant_transaction_id,
            provider_transaction_id: None,
            provider_session_id: None,
            provider: new.provider,
            user_id: new.user_id,
            amount: new.amount,
            currency: new.currency,
            plan_name: new.plan_name,
            status: TransactionStatus::Pending,
            payment_method: None,
            metadata: if new.metadata.is_null() {
                serde_json::json!({})
            } else {
                new.metadata
            },
            created_at: now,
            updated_at: now,
        };
        let metadata_s = serde_json::to_string(&record.metadata)?;
        let now_s = to_storage_string(&now);

        let conn = self.connection.lock().await;
        let inserted = conn.execute(
            "INSERT INTO transactions (
                id, merchant_transaction_id, provider, user_id, amount, currency,
                plan_name, status, metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            rusqlite::params![
                &record.id,
                &record.merchant_transaction_id,
                record.provider.as_str(),
                &record.user_id,
                record.amount,
                record.currency.as_str(),
                &record.plan_name,
                record.status.as_str(),
                metadata_s,
                now_s,
            ],
        );
        match inserted {
            Ok(_) => Ok(record),
            Err(e) if is_unique_violation(&e) => Err(PaymentError::Validation(format!(
                "transaction {} already exists",
                record.merchant_transaction_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, PaymentError> {
        let conn = self.connection.lock().await;
        Ok(select_record(&conn, merchant_transaction_id)?)
    }

    async fn attach_session(
        &self,
        merchant_transaction_id: &str,
        provider_session_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<TransactionRecord>, PaymentError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let Some(mut record) = select_record(&tx, merchant_transaction_id)? else {
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(Some(record));
        }
        merge_metadata(&mut record.metadata, metadata);
        record.provider_session_id = Some(provider_session_id.to_string());
        record.updated_at = Utc::now();
        tx.execute(
            "UPDATE transactions
             SET provider_session_id = ?1, metadata = ?2, updated_at = ?3
             WHERE merchant_transaction_id = ?4 AND status = 'PENDING'",
            rusqlite::params![
                provider_session_id,
                serde_json::to_string(&record.metadata)?,
                to_storage_string(&record.updated_at),
                merchant_transaction_id,
            ],
        )?;
        tx.commit()?;
        Ok(Some(record))
    }

    async fn settle(
        &self,
        merchant_transaction_id: &str,
        settlement: Settlement,
        credit_grant: i64,
    ) -> Result<Option<SettleOutcome>, PaymentError> {
        settlement.ensure_terminal()?;
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let Some(mut record) = select_record(&tx, merchant_transaction_id)? else {
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(Some(SettleOutcome::AlreadySettled(record)));
        }

        let now = Utc::now();
        merge_metadata(&mut record.metadata, settlement.metadata);
        record.status = settlement.status;
        if settlement.provider_transaction_id.is_some() {
            record.provider_transaction_id = settlement.provider_transaction_id;
        }
        if settlement.payment_method.is_some() {
            record.payment_method = settlement.payment_method;
        }
        record.updated_at = now;

        let changed = tx.execute(
            "UPDATE transactions
             SET status = ?1, provider_transaction_id = ?2, payment_method = ?3,
                 metadata = ?4, updated_at = ?5
             WHERE merchant_transaction_id = ?6 AND status = 'PENDING'",
            rusqlite::params![
                record.status.as_str(),
                &record.provider_transaction_id,
                &record.payment_method,
                serde_json::to_string(&record.metadata)?,
                to_storage_string(&now),
                merchant_transaction_id,
            ],
        )?;
        if changed == 0 {
            let current = select_record(&tx, merchant_transaction_id)?;
            return Ok(current.map(SettleOutcome::AlreadySettled));
        }

        let mut credits_granted = 0;
        if record.status == TransactionStatus::Success && credit_grant > 0 {
            add_total_credit(&tx, &record.user_id, credit_grant, &now)?;
            credits_granted = credit_grant;
        }
        tx.commit()?;

        Ok(Some(SettleOutcome::Settled {
            record,
            credits_granted,
        }))
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, PaymentError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE status = 'PENDING' AND created_at < ?1
             ORDER BY created_at ASC
             LIMIT ?2",
            TX_COLUMNS
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![to_storage_string(&created_before), limit],
            row_to_record,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn list_user_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, PaymentError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3",
            TX_COLUMNS
        ))?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit, offset], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
