use std::collections::HashMap;

use serde::Deserialize;

use crate::providers::ProviderOutcome;

/// The subset of a Checkout Session object this service reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
}

impl CheckoutSessionObject {
    /// `paid`/`no_payment_required` settle as success, an expired session as
    /// expired; anything else is still in flight.
    pub fn outcome(&self) -> ProviderOutcome {
        match self.payment_status.as_deref() {
            Some("paid") | Some("no_payment_required") => ProviderOutcome::Success,
            _ if self.status.as_deref() == Some("expired") => ProviderOutcome::Expired,
            _ => ProviderOutcome::Pending,
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// A webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

/// The event types that move a transaction; everything else is acknowledged.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Completed(CheckoutSessionObject),
    AsyncPaymentSucceeded(CheckoutSessionObject),
    AsyncPaymentFailed(CheckoutSessionObject),
    Expired(CheckoutSessionObject),
}

impl SessionEvent {
    pub fn session(&self) -> &CheckoutSessionObject {
        match self {
            SessionEvent::Completed(s)
            | SessionEvent::AsyncPaymentSucceeded(s)
            | SessionEvent::AsyncPaymentFailed(s)
            | SessionEvent::Expired(s) => s,
        }
    }

    pub fn outcome(&self) -> ProviderOutcome {
        match self {
            SessionEvent::Completed(s) => s.outcome(),
            SessionEvent::AsyncPaymentSucceeded(_) => ProviderOutcome::Success,
            SessionEvent::AsyncPaymentFailed(_) => ProviderOutcome::Failed,
            SessionEvent::Expired(_) => ProviderOutcome::Expired,
        }
    }
}

impl StripeEvent {
    /// `Ok(None)` for event types this service ignores.
    pub fn session_event(&self) -> Result<Option<SessionEvent>, serde_json::Error> {
        let wrap: fn(CheckoutSessionObject) -> SessionEvent = match self.event_type.as_str() {
            "checkout.session.completed" => SessionEvent::Completed,
            "checkout.session.async_payment_succeeded" => SessionEvent::AsyncPaymentSucceeded,
            "checkout.session.async_payment_failed" => SessionEvent::AsyncPaymentFailed,
            "checkout.session.expired" => SessionEvent::Expired,
            _ => return Ok(None),
        };
        let session: CheckoutSessionObject = serde_json::from_value(self.data.object.clone())?;
        Ok(Some(wrap(session)))
    }
}
