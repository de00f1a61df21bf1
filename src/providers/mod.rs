pub mod phonepe;
pub mod stripe;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::PaymentError;
use crate::http_client;
use crate::transactions::{Currency, TransactionRecord, TransactionStatus};

pub use crate::transactions::ProviderKind;
pub use phonepe::PhonePeClient;
pub use stripe::StripeClient;

/// What the orchestrator hands a provider when opening a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub merchant_transaction_id: String,
    pub user_id: String,
    pub plan_name: String,
    /// Major units (rupees, dollars).
    pub amount: f64,
    pub currency: Currency,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Pending,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl ProviderOutcome {
    pub fn status(self) -> TransactionStatus {
        match self {
            ProviderOutcome::Pending => TransactionStatus::Pending,
            ProviderOutcome::Success => TransactionStatus::Success,
            ProviderOutcome::Failed => TransactionStatus::Failed,
            ProviderOutcome::Cancelled => TransactionStatus::Cancelled,
            ProviderOutcome::Expired => TransactionStatus::Expired,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ProviderOutcome::Pending
    }
}

/// A provider's answer to "what happened to this payment?".
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub outcome: ProviderOutcome,
    pub provider_transaction_id: Option<String>,
    pub payment_method: Option<String>,
    /// Provider error code for unsuccessful payments (e.g. `PAYMENT_DECLINED`).
    pub failure_code: Option<String>,
    pub raw: serde_json::Value,
}

impl ProviderStatus {
    pub fn pending(raw: serde_json::Value) -> Self {
        Self {
            outcome: ProviderOutcome::Pending,
            provider_transaction_id: None,
            payment_method: None,
            failure_code: None,
            raw,
        }
    }
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn supports_currency(&self, currency: Currency) -> bool;

    /// Used when the client does not name a currency.
    fn default_currency(&self) -> Currency;

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn fetch_status(
        &self,
        record: &TransactionRecord,
    ) -> Result<ProviderStatus, PaymentError>;
}

/// The configured adapters. A provider without credentials is simply absent.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    stripe: Option<Arc<dyn CheckoutProvider>>,
    phonepe: Option<Arc<dyn CheckoutProvider>>,
}

impl ProviderRegistry {
    pub fn from_settings(settings: &Settings) -> Result<Self, PaymentError> {
        let timeout = std::time::Duration::from_secs(settings.payments.provider_timeout_secs.max(1));
        let http = http_client::provider_client(timeout)?;
        let mut registry = Self::default();

        match StripeClient::from_config(&settings.stripe, &settings.app.base_url, http.clone()) {
            Some(client) => {
                tracing::info!(
                    "Stripe checkout enabled ({})",
                    settings.stripe.currency.as_str()
                );
                registry = registry.with(Arc::new(client));
            }
            None => tracing::warn!("STRIPE_SECRET_KEY not set; Stripe checkout disabled"),
        }
        match PhonePeClient::from_config(&settings.phonepe, &settings.app.base_url, http) {
            Some(client) => {
                tracing::info!(
                    "PhonePe checkout enabled ({:?})",
                    settings.phonepe.environment
                );
                registry = registry.with(Arc::new(client));
            }
            None => tracing::warn!("PhonePe credentials not set; PhonePe checkout disabled"),
        }
        Ok(registry)
    }

    pub fn with(mut self, provider: Arc<dyn CheckoutProvider>) -> Self {
        match provider.kind() {
            ProviderKind::Stripe => self.stripe = Some(provider),
            ProviderKind::PhonePe => self.phonepe = Some(provider),
        }
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn CheckoutProvider>, PaymentError> {
        let slot = match kind {
            ProviderKind::Stripe => &self.stripe,
            ProviderKind::PhonePe => &self.phonepe,
        };
        slot.clone()
            .ok_or_else(|| PaymentError::Unavailable(format!("{} checkout", kind.as_str())))
    }
}

/// Where the provider sends the customer back after paying.
pub(crate) fn verify_url(base_url: &str, merchant_transaction_id: &str) -> String {
    format!(
        "{}/payment/verify?transactionId={}",
        base_url.trim_end_matches('/'),
        merchant_transaction_id
    )
}

pub(crate) fn failure_url(base_url: &str, merchant_transaction_id: &str, code: &str) -> String {
    format!(
        "{}/payment/failure?transactionId={}&code={}",
        base_url.trim_end_matches('/'),
        merchant_transaction_id,
        code
    )
}
