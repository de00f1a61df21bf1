use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::storage::postgres::PgStore;
use crate::transactions::{
    Currency, NewTransaction, ProviderKind, SettleOutcome, Settlement, TransactionRecord,
    TransactionStatus, TransactionStore,
};

const TX_COLUMNS: &str = "id, merchant_transaction_id, provider_transaction_id, provider_session_id, \
     provider, user_id, amount, currency, plan_name, status, payment_method, metadata, \
     created_at, updated_at";

fn invalid(column: &str, value: &str) -> PaymentError {
    PaymentError::Config(format!("invalid {} `{}` in transactions", column, value))
}

fn row_to_record(row: &Row) -> Result<TransactionRecord, PaymentError> {
    let provider_s: String = row.try_get("provider")?;
    let currency_s: String = row.try_get("currency")?;
    let status_s: String = row.try_get("status")?;
    Ok(TransactionRecord {
        id: row.try_get("id")?,
        merchant_transaction_id: row.try_get("merchant_transaction_id")?,
        provider_transaction_id: row.try_get("provider_transaction_id")?,
        provider_session_id: row.try_get("provider_session_id")?,
        provider: ProviderKind::parse(&provider_s).ok_or_else(|| invalid("provider", &provider_s))?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: Currency::parse(&currency_s).ok_or_else(|| invalid("currency", &currency_s))?,
        plan_name: row.try_get("plan_name")?,
        status: TransactionStatus::parse(&status_s).ok_or_else(|| invalid("status", &status_s))?,
        payment_method: row.try_get("payment_method")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn object_or_empty(v: serde_json::Value) -> serde_json::Value {
    if v.is_object() {
        v
    } else if v.is_null() {
        serde_json::json!({})
    } else {
        serde_json::json!({ "extra": v })
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, PaymentError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let metadata = object_or_empty(new.metadata);
        let client = self.pool.pick();
        let inserted = client
            .execute(
                "INSERT INTO transactions (
                    id, merchant_transaction_id, provider, user_id, amount, currency,
                    plan_name, status, metadata, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)",
                &[
                    &id,
                    &new.merchant_transaction_id,
                    &new.provider.as_str(),
                    &new.user_id,
                    &new.amount,
                    &new.currency.as_str(),
                    &new.plan_name,
                    &TransactionStatus::Pending.as_str(),
                    &metadata,
                    &now,
                ],
            )
            .await;
        if let Err(e) = inserted {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                return Err(PaymentError::Validation(format!(
                    "transaction {} already exists",
                    new.merchant_transaction_id
                )));
            }
            return Err(e.into());
        }
        Ok(TransactionRecord {
            id,
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
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, PaymentError> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM transactions WHERE merchant_transaction_id = $1",
                    TX_COLUMNS
                ),
                &[&merchant_transaction_id],
            )
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn attach_session(
        &self,
        merchant_transaction_id: &str,
        provider_session_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<TransactionRecord>, PaymentError> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                &format!(
                    "UPDATE transactions
                     SET provider_session_id = $2, metadata = metadata || $3::jsonb, updated_at = $4
                     WHERE merchant_transaction_id = $1 AND status = 'PENDING'
                     RETURNING {}",
                    TX_COLUMNS
                ),
                &[
                    &merchant_transaction_id,
                    &provider_session_id,
                    &object_or_empty(metadata),
                    &Utc::now(),
                ],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            // either unknown or already terminal
            None => self.get_transaction(merchant_transaction_id).await,
        }
    }

    async fn settle(
        &self,
        merchant_transaction_id: &str,
        settlement: Settlement,
        credit_grant: i64,
    ) -> Result<Option<SettleOutcome>, PaymentError> {
        settlement.ensure_terminal()?;
        let Some(current) = self.get_transaction(merchant_transaction_id).await? else {
            return Ok(None);
        };
        if current.status.is_terminal() {
            return Ok(Some(SettleOutcome::AlreadySettled(current)));
        }

        // The status guard and the ledger increment run as one statement, so
        // concurrent deliveries cannot both grant.
        let client = self.pool.pick();
        let row = client
            .query_opt(
                &format!(
                    "WITH settled AS (
                        UPDATE transactions
                        SET status = $2,
                            provider_transaction_id = COALESCE($3::TEXT, provider_transaction_id),
                            payment_method = COALESCE($4::TEXT, payment_method),
                            metadata = metadata || $5::jsonb,
                            updated_at = $6
                        WHERE merchant_transaction_id = $1 AND status = 'PENDING'
                        RETURNING {cols}
                    ), granted AS (
                        INSERT INTO credits (id, total_credit, used_credit, updated_at)
                        SELECT user_id, $7::BIGINT, 0, $6 FROM settled
                        WHERE status = 'SUCCESS' AND $7::BIGINT > 0
                        ON CONFLICT (id) DO UPDATE SET
                            total_credit = credits.total_credit + EXCLUDED.total_credit,
                            updated_at = EXCLUDED.updated_at
                        RETURNING id
                    )
                    SELECT {cols}, (SELECT COUNT(*) FROM granted) AS granted_rows FROM settled",
                    cols = TX_COLUMNS
                ),
                &[
                    &merchant_transaction_id,
                    &settlement.status.as_str(),
                    &settlement.provider_transaction_id,
                    &settlement.payment_method,
                    &object_or_empty(settlement.metadata),
                    &Utc::now(),
                    &credit_grant,
                ],
            )
            .await?;

        let Some(row) = row else {
            // lost the race to another delivery
            let latest = self.get_transaction(merchant_transaction_id).await?;
            return Ok(latest.map(SettleOutcome::AlreadySettled));
        };
        let record = row_to_record(&row)?;
        let granted_rows: i64 = row.try_get("granted_rows")?;
        Ok(Some(SettleOutcome::Settled {
            record,
            credits_granted: if granted_rows > 0 { credit_grant } else { 0 },
        }))
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, PaymentError> {
        let client = self.pool.pick();
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM transactions
                     WHERE status = 'PENDING' AND created_at < $1
                     ORDER BY created_at ASC
                     LIMIT $2",
                    TX_COLUMNS
                ),
                &[&created_before, &limit],
            )
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn list_user_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, PaymentError> {
        let client = self.pool.pick();
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM transactions
                     WHERE user_id = $1
                     ORDER BY created_at DESC
                     LIMIT $2 OFFSET $3",
                    TX_COLUMNS
                ),
                &[&user_id, &limit, &offset],
            )
            .await?;
        rows.iter().map(row_to_record).collect()
    }
}
