//! Stripe Checkout: session creation, session lookup and webhook parsing.

pub mod client;
pub mod types;
pub mod webhook;

pub use client::StripeClient;
pub use types::{CheckoutSessionObject, SessionEvent, StripeEvent};
pub use webhook::{WebhookVerifier, compute_signature};

use crate::error::PaymentError;

/// Parses a verified webhook body.
pub fn parse_event(payload: &[u8]) -> Result<StripeEvent, PaymentError> {
    serde_json::from_slice(payload)
        .map_err(|e| PaymentError::Validation(format!("malformed Stripe event: {}", e)))
}
