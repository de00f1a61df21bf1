use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::PaymentError;

/// The fields this service needs from a PhonePe server-to-server callback.
#[derive(Debug, Clone)]
pub struct PhonePeCallback {
    pub merchant_transaction_id: String,
    /// PhonePe merchant the callback was sent for, when it names one.
    pub merchant_id: Option<String>,
    pub state: String,
    pub provider_transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub event: Option<String>,
    pub raw: Value,
}

impl PhonePeCallback {
    /// Key for the processed-event ledger; PhonePe callbacks carry no event id.
    pub fn event_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.merchant_transaction_id,
            self.state.to_ascii_uppercase(),
            self.provider_transaction_id.as_deref().unwrap_or("-")
        )
    }
}

/// Decodes `{"response": "<base64 JSON>"}`, raw JSON or a bare base64 body.
pub fn parse_callback(body: &[u8]) -> Result<PhonePeCallback, PaymentError> {
    let decoded = decode_body(body)?;
    extract(decoded)
}

fn decode_body(body: &[u8]) -> Result<Value, PaymentError> {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(encoded) = value.get("response").and_then(Value::as_str) {
            return decode_base64_json(encoded);
        }
        return Ok(value);
    }
    let text = std::str::from_utf8(body)
        .map_err(|_| PaymentError::Validation("callback body is not UTF-8".into()))?;
    decode_base64_json(text.trim())
}

fn decode_base64_json(encoded: &str) -> Result<Value, PaymentError> {
    let bytes = B64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| PaymentError::Validation(format!("callback response is not base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PaymentError::Validation(format!("callback response is not JSON: {}", e)))
}

fn str_at<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn extract(raw: Value) -> Result<PhonePeCallback, PaymentError> {
    // v2 wraps the order in `payload`, v1 in `data`
    let order = raw
        .get("payload")
        .or_else(|| raw.get("data"))
        .filter(|v| v.is_object())
        .unwrap_or(&raw);
    let latest_attempt = order
        .get("paymentDetails")
        .and_then(Value::as_array)
        .and_then(|a| a.last());

    let merchant_transaction_id = str_at(order, &["merchantTransactionId", "merchantOrderId"])
        .ok_or_else(|| PaymentError::Validation("callback has no merchant transaction id".into()))?
        .to_string();
    let merchant_id = str_at(order, &["merchantId"])
        .or_else(|| str_at(&raw, &["merchantId"]))
        .map(String::from);
    let state = str_at(order, &["state"])
        .or_else(|| str_at(&raw, &["code", "state"]))
        .ok_or_else(|| PaymentError::Validation("callback has no payment state".into()))?
        .to_string();
    let provider_transaction_id = str_at(order, &["transactionId"])
        .or_else(|| latest_attempt.and_then(|a| str_at(a, &["transactionId"])))
        .or_else(|| str_at(order, &["orderId"]))
        .map(String::from);
    let payment_method = order
        .pointer("/paymentInstrument/type")
        .and_then(Value::as_str)
        .or_else(|| latest_attempt.and_then(|a| str_at(a, &["paymentMode"])))
        .map(String::from);
    let event = str_at(&raw, &["event", "type"]).map(String::from);

    Ok(PhonePeCallback {
        merchant_transaction_id,
        merchant_id,
        state,
        provider_transaction_id,
        payment_method,
        event,
        raw,
    })
}

/// Checks the `Authorization` header PhonePe sends with callbacks:
/// `hex(sha256("username:password"))`, optionally prefixed with `SHA256 `.
#[derive(Clone)]
pub struct CallbackAuth {
    expected: String,
}

impl CallbackAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            expected: callback_digest(username, password),
        }
    }

    pub fn verify(&self, header: Option<&str>) -> bool {
        let Some(value) = header else {
            return false;
        };
        let value = value.trim();
        let value = value
            .strip_prefix("SHA256 ")
            .or_else(|| value.strip_prefix("sha256 "))
            .unwrap_or(value)
            .trim()
            .to_ascii_lowercase();
        constant_time_eq(value.as_bytes(), self.expected.as_bytes())
    }
}

pub fn callback_digest(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", username, password).as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
