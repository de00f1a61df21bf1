use std::time::Duration;

use reqwest::ClientBuilder;

const USER_AGENT: &str = concat!("credit-gateway/", env!("CARGO_PKG_VERSION"));

fn base_builder() -> ClientBuilder {
    reqwest::Client::builder().user_agent(USER_AGENT)
}

/// Client used for every provider call. Nothing is retried; a slow provider
/// surfaces as an `Http` error once `timeout` elapses.
pub fn provider_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    let builder = base_builder().timeout(timeout);
    builder.connect_timeout(timeout.min(Duration::from_secs(10))).build()
}

/// Pulls a human-readable message out of a provider error body.
///
/// Stripe nests it (`{"error":{"message":..}}`), PhonePe keeps it flat
/// (`{"message":..}` or `{"code":..}`); anything else is returned trimmed.
pub fn error_message_from_body(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            v.pointer("/error/message"),
            v.get("message"),
            v.get("error_description"),
            v.get("code"),
            v.get("error").filter(|e| e.is_string()),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(|c| c.as_str()) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(300).collect()
    }
}
