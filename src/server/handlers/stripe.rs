use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use std::sync::Arc;

use crate::error::PaymentError;
use crate::payments::{DeliveryAck, InitiateRequest, InitiateResponse};
use crate::providers::ProviderKind;
use crate::server::AppState;
use crate::server::util::{header_str, parse_json_body};

pub async fn create_checkout_session(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<InitiateResponse>, PaymentError> {
    let request: InitiateRequest = parse_json_body(&body)?;
    let response = app_state
        .payments
        .initiate(ProviderKind::Stripe, request)
        .await?;
    Ok(Json(response))
}

// Raw body: the signature covers the exact bytes Stripe sent
pub async fn webhook(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryAck>, PaymentError> {
    let signature = header_str(&headers, "stripe-signature");
    let ack = app_state
        .payments
        .handle_stripe_webhook(&body, signature)
        .await?;
    Ok(Json(ack))
}
