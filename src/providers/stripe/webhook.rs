use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies the `stripe-signature` header of webhook deliveries.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Accepts the payload when any `v1` signature matches and `t` is within
    /// the tolerance of `now` (unix seconds).
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<(), PaymentError> {
        let parsed = SignatureHeader::parse(header)?;
        let age = now.checked_sub(parsed.timestamp).map(i64::unsigned_abs);
        if age.is_none_or(|age| age > self.tolerance_secs.unsigned_abs()) {
            return Err(PaymentError::Signature(
                "timestamp outside the tolerance window".into(),
            ));
        }
        for candidate in &parsed.signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = self.mac()?;
            mac.update(parsed.timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            // verify_slice compares in constant time
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(PaymentError::Signature("no matching v1 signature".into()))
    }

    fn mac(&self) -> Result<HmacSha256, PaymentError> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| PaymentError::Config(format!("invalid webhook secret: {}", e)))
    }
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Result<Self, PaymentError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or_else(|| {
            PaymentError::Signature("signature header has no valid timestamp".into())
        })?;
        if signatures.is_empty() {
            return Err(PaymentError::Signature(
                "signature header has no v1 signature".into(),
            ));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, the value Stripe sends as `v1`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
