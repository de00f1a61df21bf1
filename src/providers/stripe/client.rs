use async_trait::async_trait;
use serde_json::Value;

use crate::config::settings::StripeConfig;
use crate::error::PaymentError;
use crate::http_client::error_message_from_body;
use crate::providers::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, ProviderKind, ProviderOutcome,
    ProviderStatus, failure_url, verify_url,
};
use crate::transactions::{Currency, TransactionRecord};

use super::types::CheckoutSessionObject;

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
    currency: Currency,
    app_base_url: String,
}

impl StripeClient {
    pub fn new(
        http: reqwest::Client,
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        currency: Currency,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            currency,
            app_base_url: app_base_url.into(),
        }
    }

    /// `None` when no secret key is configured.
    pub fn from_config(
        config: &StripeConfig,
        app_base_url: &str,
        http: reqwest::Client,
    ) -> Option<Self> {
        let key = config.secret_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(
            http,
            key,
            config.api_base.clone(),
            config.currency,
            app_base_url,
        ))
    }

    fn session_form(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let id = &request.merchant_transaction_id;
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), verify_url(&self.app_base_url, id)),
            (
                "cancel_url".into(),
                failure_url(&self.app_base_url, id, "PAYMENT_CANCELLED"),
            ),
            ("client_reference_id".into(), id.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.as_str().to_ascii_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                request.currency.to_minor_units(request.amount).to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                request.plan_name.clone(),
            ),
            ("metadata[userId]".into(), request.user_id.clone()),
            ("metadata[planName]".into(), request.plan_name.clone()),
            ("metadata[merchantTransactionId]".into(), id.clone()),
        ];
        if let Some(email) = request.email.as_deref().filter(|e| !e.trim().is_empty()) {
            form.push(("customer_email".into(), email.trim().to_string()));
        }
        form
    }

    async fn read_session(&self, response: reqwest::Response) -> Result<(CheckoutSessionObject, Value), PaymentError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = error_message_from_body(&body);
            tracing::error!("Stripe API returned {}: {}", status.as_u16(), message);
            return Err(PaymentError::provider("stripe", message));
        }
        let raw: Value = serde_json::from_str(&body)?;
        let session: CheckoutSessionObject = serde_json::from_value(raw.clone())?;
        Ok((session, raw))
    }
}

#[async_trait]
impl CheckoutProvider for StripeClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        currency == self.currency
    }

    fn default_currency(&self) -> Currency {
        self.currency
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!("{}/v1/checkout/sessions", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&self.session_form(request))
            .send()
            .await?;
        let (session, raw) = self.read_session(response).await?;
        let redirect_url = session
            .url
            .clone()
            .ok_or_else(|| PaymentError::provider("stripe", "checkout session has no url"))?;
        tracing::info!(
            "Stripe session {} created for {}",
            session.id,
            request.merchant_transaction_id
        );
        Ok(CheckoutSession {
            session_id: session.id,
            redirect_url,
            raw,
        })
    }

    async fn fetch_status(
        &self,
        record: &TransactionRecord,
    ) -> Result<ProviderStatus, PaymentError> {
        let Some(session_id) = record.provider_session_id.as_deref() else {
            // nothing to ask Stripe about until a session exists
            return Ok(ProviderStatus::pending(Value::Null));
        };
        let url = format!("{}/v1/checkout/sessions/{}", self.api_base, session_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let (session, raw) = self.read_session(response).await?;
        let outcome = session.outcome();
        Ok(ProviderStatus {
            outcome,
            provider_transaction_id: session.payment_intent.clone(),
            payment_method: session.payment_method_types.first().cloned(),
            failure_code: match outcome {
                ProviderOutcome::Expired => Some("TIMED_OUT".to_string()),
                _ => None,
            },
            raw,
        })
    }
}
