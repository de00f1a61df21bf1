use serde::{Deserialize, Serialize};

use crate::providers::ProviderOutcome;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub merchant_order_id: String,
    /// Paise.
    pub amount: i64,
    pub expire_after: u64,
    pub meta_info: MetaInfo,
    pub payment_flow: PaymentFlow,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaInfo {
    pub udf1: String,
    pub udf2: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFlow {
    #[serde(rename = "type")]
    pub flow_type: String,
    pub message: String,
    pub merchant_urls: MerchantUrls,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantUrls {
    pub redirect_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayResponse {
    pub order_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    #[serde(default)]
    pub order_id: Option<String>,
    pub state: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub payment_details: Vec<PaymentAttempt>,
}

impl OrderStatusResponse {
    /// The most recent payment attempt, which PhonePe lists last.
    pub fn latest_attempt(&self) -> Option<&PaymentAttempt> {
        self.payment_details.last()
    }

    pub fn failure_code(&self) -> Option<String> {
        self.error_code
            .clone()
            .or_else(|| self.latest_attempt().and_then(|a| a.error_code.clone()))
    }
}

/// Maps both v1 (`PAYMENT_SUCCESS`, ...) and v2 (`COMPLETED`, ...) states.
pub fn state_outcome(state: &str) -> ProviderOutcome {
    match state.trim().to_ascii_uppercase().as_str() {
        "COMPLETED" | "PAYMENT_SUCCESS" => ProviderOutcome::Success,
        "FAILED" | "PAYMENT_ERROR" | "PAYMENT_DECLINED" => ProviderOutcome::Failed,
        "PAYMENT_CANCELLED" => ProviderOutcome::Cancelled,
        "EXPIRED" | "TIMED_OUT" => ProviderOutcome::Expired,
        _ => ProviderOutcome::Pending,
    }
}
