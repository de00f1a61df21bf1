//! Payment orchestration: initiation, settlement and the credit views that
//! depend on it.
//!
//! Every path that learns a payment's fate (provider callback, Stripe
//! webhook, status poll, reconciliation) ends in [`PaymentService::settle`],
//! which only ever moves a record out of PENDING once and grants the plan's
//! credits in the same storage step.

pub mod failure;
pub mod merchant_id;
pub mod reconcile;
mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Settings;
use crate::credits::CreditLedger;
use crate::error::PaymentError;
use crate::plans;
use crate::providers::phonepe::CallbackAuth;
use crate::providers::stripe::WebhookVerifier;
use crate::providers::{CheckoutRequest, ProviderKind, ProviderRegistry, ProviderStatus};
use crate::server::credit_cache::CreditCache;
use crate::storage::Stores;
use crate::transactions::{
    Currency, NewTransaction, SettleOutcome, Settlement, TransactionRecord, TransactionStatus,
};

pub use webhooks::DeliveryAck;

/// Body of both initiate endpoints. Fields are optional so that missing
/// values become validation errors rather than extractor rejections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn required(value: Option<&str>, field: &str) -> Result<String, PaymentError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| PaymentError::Validation(format!("{} is required", field)))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub success: bool,
    pub transaction_id: String,
    pub payment_url: String,
    pub session_id: String,
    pub provider: ProviderKind,
}

/// What clients see when they ask about a transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub success: bool,
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub provider: ProviderKind,
    pub user_id: String,
    pub amount: f64,
    pub currency: Currency,
    pub plan_name: String,
    pub provider_transaction_id: Option<String>,
    pub payment_method: Option<String>,
    /// Failure-page code for anything but SUCCESS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TransactionRecord> for TransactionView {
    fn from(record: &TransactionRecord) -> Self {
        let code = if record.status == TransactionStatus::Success {
            None
        } else {
            let stored = record
                .metadata
                .get("failureCode")
                .and_then(|v| v.as_str())
                .filter(|_| record.status.is_terminal());
            Some(
                stored
                    .unwrap_or_else(|| failure::code_for_status(record.status))
                    .to_string(),
            )
        };
        Self {
            success: record.status == TransactionStatus::Success,
            transaction_id: record.merchant_transaction_id.clone(),
            status: record.status,
            provider: record.provider,
            user_id: record.user_id.clone(),
            amount: record.amount,
            currency: record.currency,
            plan_name: record.plan_name.clone(),
            provider_transaction_id: record.provider_transaction_id.clone(),
            payment_method: record.payment_method.clone(),
            code,
            updated_at: record.updated_at,
        }
    }
}

/// Builds the settlement for a terminal provider answer.
pub(crate) fn settlement_from(status: &ProviderStatus, settled_by: &str) -> Settlement {
    let mut metadata = json!({
        "settledBy": settled_by,
        "providerResponse": status.raw,
    });
    if let Some(code) = &status.failure_code {
        metadata["failureCode"] = json!(code);
    }
    Settlement {
        status: status.outcome.status(),
        provider_transaction_id: status.provider_transaction_id.clone(),
        payment_method: status.payment_method.clone(),
        metadata,
    }
}

pub struct PaymentService {
    stores: Stores,
    providers: ProviderRegistry,
    stripe_webhook: Option<WebhookVerifier>,
    phonepe_callback_auth: Option<CallbackAuth>,
    phonepe_merchant_id: Option<String>,
    credit_cache: Arc<CreditCache>,
}

impl PaymentService {
    pub fn new(stores: Stores, providers: ProviderRegistry, credit_cache: Arc<CreditCache>) -> Self {
        Self {
            stores,
            providers,
            stripe_webhook: None,
            phonepe_callback_auth: None,
            phonepe_merchant_id: None,
            credit_cache,
        }
    }

    pub fn with_stripe_webhook(mut self, verifier: WebhookVerifier) -> Self {
        self.stripe_webhook = Some(verifier);
        self
    }

    pub fn with_phonepe_callback_auth(mut self, auth: CallbackAuth) -> Self {
        self.phonepe_callback_auth = Some(auth);
        self
    }

    /// Callbacks naming a different PhonePe merchant are refused.
    pub fn with_phonepe_merchant_id(mut self, merchant_id: impl Into<String>) -> Self {
        self.phonepe_merchant_id = Some(merchant_id.into());
        self
    }

    pub fn from_settings(settings: &Settings, stores: Stores) -> Result<Self, PaymentError> {
        let providers = ProviderRegistry::from_settings(settings)?;
        let cache = Arc::new(CreditCache::new(Duration::from_secs(
            settings.credits.cache_ttl_secs,
        )));
        let mut service = Self::new(stores, providers, cache);

        match settings.stripe.webhook_secret.as_deref() {
            Some(secret) if !secret.trim().is_empty() => {
                service = service.with_stripe_webhook(WebhookVerifier::new(
                    secret.trim(),
                    settings.stripe.webhook_tolerance_secs,
                ));
            }
            _ => tracing::warn!("STRIPE_WEBHOOK_SECRET not set; Stripe webhooks will be refused"),
        }
        match (
            settings.phonepe.callback_username.as_deref(),
            settings.phonepe.callback_password.as_deref(),
        ) {
            (Some(user), Some(pass)) => {
                service = service.with_phonepe_callback_auth(CallbackAuth::new(user, pass));
            }
            _ => tracing::info!(
                "PhonePe callback credentials not set; callbacks are confirmed via the status API"
            ),
        }
        if let Some(merchant_id) = settings
            .phonepe
            .merchant_id
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            service = service.with_phonepe_merchant_id(merchant_id);
        }
        Ok(service)
    }

    async fn find(&self, merchant_transaction_id: &str) -> Result<TransactionRecord, PaymentError> {
        self.stores
            .transactions
            .get_transaction(merchant_transaction_id)
            .await?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("transaction {} not found", merchant_transaction_id))
            })
    }

    /// Records a PENDING transaction, then opens a checkout with `kind`.
    pub async fn initiate(
        &self,
        kind: ProviderKind,
        request: InitiateRequest,
    ) -> Result<InitiateResponse, PaymentError> {
        let user_id = required(request.user_id.as_deref(), "userId")?;
        let plan_name = required(request.plan_name.as_deref(), "planName")?;
        let amount = request
            .amount
            .ok_or_else(|| PaymentError::Validation("amount is required".into()))?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(PaymentError::Validation("amount must be positive".into()));
        }

        let provider = self.providers.get(kind)?;
        let currency = match request.currency.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => Currency::parse(c)
                .ok_or_else(|| PaymentError::Validation(format!("unsupported currency {}", c)))?,
            _ => provider.default_currency(),
        };
        if !provider.supports_currency(currency) {
            return Err(PaymentError::Validation(format!(
                "{} does not accept {}",
                kind.as_str(),
                currency.as_str()
            )));
        }
        if !plans::is_known_plan(&plan_name) {
            tracing::warn!("Unknown plan `{}` for user {}; it grants no credits", plan_name, user_id);
        }

        let merchant_transaction_id = merchant_id::generate(&user_id, Utc::now());
        let email = request.email.filter(|e| !e.trim().is_empty());
        let phone = request.phone.filter(|p| !p.trim().is_empty());
        self.stores
            .transactions
            .create_transaction(NewTransaction {
                merchant_transaction_id: merchant_transaction_id.clone(),
                provider: kind,
                user_id: user_id.clone(),
                amount,
                currency,
                plan_name: plan_name.clone(),
                metadata: json!({ "customer": { "email": email, "phone": phone } }),
            })
            .await?;
        tracing::info!(
            "Initiating {} payment {} for user {} ({} {} {})",
            kind.as_str(),
            merchant_transaction_id,
            user_id,
            plan_name,
            amount,
            currency.as_str()
        );

        let checkout = CheckoutRequest {
            merchant_transaction_id: merchant_transaction_id.clone(),
            user_id,
            plan_name,
            amount,
            currency,
            email,
            phone,
        };
        let session = match provider.create_checkout(&checkout).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("{} checkout for {} failed: {}", kind.as_str(), merchant_transaction_id, e);
                let mut failed = Settlement::new(TransactionStatus::Failed);
                failed.metadata = json!({
                    "settledBy": "initiate",
                    "failureCode": failure::PAYMENT_ERROR,
                    "error": e.to_string(),
                });
                if let Err(settle_err) = self.settle(&merchant_transaction_id, failed).await {
                    tracing::warn!(
                        "Could not mark {} as failed: {}",
                        merchant_transaction_id,
                        settle_err
                    );
                }
                return Err(e);
            }
        };

        self.stores
            .transactions
            .attach_session(
                &merchant_transaction_id,
                &session.session_id,
                json!({ "checkoutSession": session.raw }),
            )
            .await?;

        Ok(InitiateResponse {
            success: true,
            transaction_id: merchant_transaction_id,
            payment_url: session.redirect_url,
            session_id: session.session_id,
            provider: kind,
        })
    }

    /// Applies a terminal status to a PENDING record exactly once and grants
    /// the plan's credits when it becomes SUCCESS. Terminal records come back
    /// as `AlreadySettled`, untouched.
    pub async fn settle(
        &self,
        merchant_transaction_id: &str,
        settlement: Settlement,
    ) -> Result<SettleOutcome, PaymentError> {
        let current = self.find(merchant_transaction_id).await?;
        let grant = plans::credit_grant(&current.plan_name);
        let outcome = self
            .stores
            .transactions
            .settle(merchant_transaction_id, settlement, grant)
            .await?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("transaction {} not found", merchant_transaction_id))
            })?;

        match &outcome {
            SettleOutcome::Settled {
                record,
                credits_granted,
            } => {
                tracing::info!(
                    "Transaction {} settled as {} (user {}, +{} credits)",
                    record.merchant_transaction_id,
                    record.status.as_str(),
                    record.user_id,
                    credits_granted
                );
                self.credit_cache.invalidate(&record.user_id).await;
            }
            SettleOutcome::AlreadySettled(record) => {
                tracing::info!(
                    "Transaction {} already {}; nothing to apply",
                    record.merchant_transaction_id,
                    record.status.as_str()
                );
            }
        }
        Ok(outcome)
    }

    /// Answers terminal records locally; PENDING ones are polled at the
    /// provider and settled when it reports an outcome.
    pub async fn check_status(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<TransactionView, PaymentError> {
        let record = self.find(merchant_transaction_id).await?;
        if record.status.is_terminal() {
            return Ok(TransactionView::from(&record));
        }

        let provider = self.providers.get(record.provider)?;
        let status = provider.fetch_status(&record).await?;
        if !status.outcome.is_terminal() {
            tracing::debug!("Transaction {} still pending at provider", merchant_transaction_id);
            return Ok(TransactionView::from(&record));
        }
        let outcome = self
            .settle(merchant_transaction_id, settlement_from(&status, "status_poll"))
            .await?;
        Ok(TransactionView::from(outcome.record()))
    }

    /// Cached credit view.
    pub async fn credit_balance(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        let user_id = required(Some(user_id), "userId")?;
        if let Some(ledger) = self.credit_cache.get(&user_id).await {
            return Ok(ledger);
        }
        let ledger = self.stores.credits.get_ledger(&user_id).await?;
        self.credit_cache.put(ledger.clone()).await;
        Ok(ledger)
    }

    /// Drops the cached view and reads the ledger again.
    pub async fn refresh_credits(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        self.credit_cache.invalidate(user_id).await;
        self.credit_balance(user_id).await
    }

    /// Spends one credit for a search action.
    pub async fn consume_credit(&self, user_id: &str) -> Result<CreditLedger, PaymentError> {
        let user_id = required(Some(user_id), "userId")?;
        let result = self.stores.credits.consume_credit(&user_id).await;
        self.credit_cache.invalidate(&user_id).await;
        result
    }

    pub async fn user_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionView>, PaymentError> {
        let user_id = required(Some(user_id), "userId")?;
        let records = self
            .stores
            .transactions
            .list_user_transactions(&user_id, limit.clamp(1, 100), offset.max(0))
            .await?;
        Ok(records.iter().map(TransactionView::from).collect())
    }
}
