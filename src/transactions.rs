use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "INR", alias = "inr")]
    Inr,
    #[serde(rename = "CAD", alias = "cad")]
    Cad,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Inr => "INR",
            Currency::Cad => "CAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INR" => Some(Currency::Inr),
            "CAD" => Some(Currency::Cad),
            _ => None,
        }
    }

    /// Converts a major-unit amount (rupees, dollars) into the smallest unit
    /// (paise, cents) used by both providers.
    pub fn to_minor_units(self, amount: f64) -> i64 {
        (amount * 100.0).round() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stripe,
    #[serde(rename = "phonepe")]
    PhonePe,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::PhonePe => "phonepe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(ProviderKind::Stripe),
            "phonepe" => Some(ProviderKind::PhonePe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "SUCCESS" => Some(TransactionStatus::Success),
            "FAILED" => Some(TransactionStatus::Failed),
            "CANCELLED" => Some(TransactionStatus::Cancelled),
            "EXPIRED" => Some(TransactionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub merchant_transaction_id: String,
    pub provider_transaction_id: Option<String>,
    pub provider_session_id: Option<String>,
    pub provider: ProviderKind,
    pub user_id: String,
    pub amount: f64,
    pub currency: Currency,
    pub plan_name: String,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub merchant_transaction_id: String,
    pub provider: ProviderKind,
    pub user_id: String,
    pub amount: f64,
    pub currency: Currency,
    pub plan_name: String,
    pub metadata: serde_json::Value,
}

/// Terminal state reported by a provider, applied to a PENDING record.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub status: TransactionStatus,
    pub provider_transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
}

impl Settlement {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status,
            provider_transaction_id: None,
            payment_method: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn ensure_terminal(&self) -> Result<(), PaymentError> {
        if self.status.is_terminal() {
            Ok(())
        } else {
            Err(PaymentError::Validation(
                "a settlement must carry a terminal status".into(),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// This call moved the record out of PENDING.
    Settled {
        record: TransactionRecord,
        credits_granted: i64,
    },
    /// The record was already terminal; nothing changed.
    AlreadySettled(TransactionRecord),
}

impl SettleOutcome {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            SettleOutcome::Settled { record, .. } => record,
            SettleOutcome::AlreadySettled(record) => record,
        }
    }

    pub fn credits_granted(&self) -> i64 {
        match self {
            SettleOutcome::Settled {
                credits_granted, ..
            } => *credits_granted,
            SettleOutcome::AlreadySettled(_) => 0,
        }
    }
}

/// Shallow merge of `patch` into `base`. Non-object bases are replaced.
pub fn merge_metadata(base: &mut serde_json::Value, patch: serde_json::Value) {
    match patch {
        serde_json::Value::Null => {}
        serde_json::Value::Object(p) => {
            if let Some(obj) = base.as_object_mut() {
                for (k, v) in p {
                    obj.insert(k, v);
                }
            } else {
                *base = serde_json::Value::Object(p);
            }
        }
        other => {
            if let Some(obj) = base.as_object_mut() {
                obj.insert("extra".to_string(), other);
            } else {
                *base = other;
            }
        }
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, PaymentError>;

    async fn get_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, PaymentError>;

    /// Stores the provider's session id while the record is still PENDING.
    async fn attach_session(
        &self,
        merchant_transaction_id: &str,
        provider_session_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<TransactionRecord>, PaymentError>;

    /// Moves a PENDING record to the settlement's terminal status and, when it
    /// becomes SUCCESS, adds `credit_grant` to the owner's ledger in the same
    /// atomic step. Returns `None` for an unknown id.
    async fn settle(
        &self,
        merchant_transaction_id: &str,
        settlement: Settlement,
        credit_grant: i64,
    ) -> Result<Option<SettleOutcome>, PaymentError>;

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, PaymentError>;

    async fn list_user_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, PaymentError>;
}
