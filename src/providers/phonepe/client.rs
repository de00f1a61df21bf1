use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::settings::PhonePeConfig;
use crate::error::PaymentError;
use crate::http_client::error_message_from_body;
use crate::providers::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, ProviderKind, ProviderStatus, verify_url,
};
use crate::transactions::{Currency, TransactionRecord};

use super::types::{
    MerchantUrls, MetaInfo, OrderStatusResponse, PayRequest, PayResponse, PaymentFlow,
    TokenResponse, state_outcome,
};

/// Refresh this many seconds before the token's stated expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
/// Used when the token response omits `expires_at`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 900;
const DEFAULT_EXPIRE_AFTER_SECS: u64 = 1200;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct PhonePeCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub client_version: String,
}

pub struct PhonePeClient {
    http: reqwest::Client,
    credentials: PhonePeCredentials,
    auth_url: String,
    pg_base: String,
    app_base_url: String,
    expire_after_secs: u64,
    token: Mutex<Option<CachedToken>>,
}

impl PhonePeClient {
    pub fn new(
        http: reqwest::Client,
        credentials: PhonePeCredentials,
        auth_url: impl Into<String>,
        pg_base: impl Into<String>,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            auth_url: auth_url.into(),
            pg_base: pg_base.into().trim_end_matches('/').to_string(),
            app_base_url: app_base_url.into(),
            expire_after_secs: DEFAULT_EXPIRE_AFTER_SECS,
            token: Mutex::new(None),
        }
    }

    pub fn with_expire_after(mut self, secs: u64) -> Self {
        self.expire_after_secs = secs;
        self
    }

    /// `None` unless client id and secret are both configured.
    pub fn from_config(
        config: &PhonePeConfig,
        app_base_url: &str,
        http: reqwest::Client,
    ) -> Option<Self> {
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let credentials = PhonePeCredentials {
            client_id: non_empty(&config.client_id)?,
            client_secret: non_empty(&config.client_secret)?,
            client_version: non_empty(&config.client_version).unwrap_or_else(|| "1".to_string()),
        };
        let client = Self::new(
            http,
            credentials,
            config.auth_url(),
            config.pg_base(),
            app_base_url,
        );
        Some(match config.expire_after_secs {
            Some(secs) => client.with_expire_after(secs),
            None => client,
        })
    }

    /// Returns a cached token, fetching a new one when it is missing or
    /// within the refresh margin of expiry.
    pub async fn access_token(&self) -> Result<String, PaymentError> {
        let mut guard = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(cached.access_token.clone());
            }
        }

        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_version", self.credentials.client_version.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];
        let response = self.http.post(&self.auth_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = error_message_from_body(&body);
            tracing::error!("PhonePe token request failed ({}): {}", status.as_u16(), message);
            return Err(PaymentError::provider(
                "phonepe",
                format!("authorization failed: {}", message),
            ));
        }
        let token: TokenResponse = serde_json::from_str(&body)?;
        let expires_at = token
            .expires_at
            .unwrap_or(now + DEFAULT_TOKEN_LIFETIME_SECS);
        tracing::debug!("PhonePe token refreshed, expires at {}", expires_at);
        *guard = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    fn pay_request(&self, request: &CheckoutRequest) -> PayRequest {
        PayRequest {
            merchant_order_id: request.merchant_transaction_id.clone(),
            amount: request.currency.to_minor_units(request.amount),
            expire_after: self.expire_after_secs,
            meta_info: MetaInfo {
                udf1: request.user_id.clone(),
                udf2: request.plan_name.clone(),
            },
            payment_flow: PaymentFlow {
                flow_type: "PG_CHECKOUT".to_string(),
                message: format!("Payment for {}", request.plan_name),
                merchant_urls: MerchantUrls {
                    redirect_url: verify_url(&self.app_base_url, &request.merchant_transaction_id),
                },
            },
        }
    }

    async fn read_body(response: reqwest::Response) -> Result<String, PaymentError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = error_message_from_body(&body);
            tracing::error!("PhonePe API returned {}: {}", status.as_u16(), message);
            return Err(PaymentError::provider("phonepe", message));
        }
        Ok(body)
    }
}

#[async_trait]
impl CheckoutProvider for PhonePeClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PhonePe
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        currency == Currency::Inr
    }

    fn default_currency(&self) -> Currency {
        Currency::Inr
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let token = self.access_token().await?;
        let url = format!("{}/checkout/v2/pay", self.pg_base);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("O-Bearer {}", token))
            .json(&self.pay_request(request))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let raw: Value = serde_json::from_str(&body)?;
        let pay: PayResponse = serde_json::from_value(raw.clone())?;
        tracing::info!(
            "PhonePe order {} created for {}",
            pay.order_id,
            request.merchant_transaction_id
        );
        Ok(CheckoutSession {
            session_id: pay.order_id,
            redirect_url: pay.redirect_url,
            raw,
        })
    }

    async fn fetch_status(
        &self,
        record: &TransactionRecord,
    ) -> Result<ProviderStatus, PaymentError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/checkout/v2/order/{}/status",
            self.pg_base, record.merchant_transaction_id
        );
        let response = self
            .http
            .get(&url)
            .query(&[("details", "false")])
            .header("Authorization", format!("O-Bearer {}", token))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let raw: Value = serde_json::from_str(&body)?;
        let order: OrderStatusResponse = serde_json::from_value(raw.clone())?;
        let latest = order.latest_attempt().cloned().unwrap_or_default();
        Ok(ProviderStatus {
            outcome: state_outcome(&order.state),
            provider_transaction_id: latest.transaction_id.or(order.order_id.clone()),
            payment_method: latest.payment_mode,
            failure_code: order.failure_code(),
            raw,
        })
    }
}
