use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use std::sync::Arc;

use crate::error::PaymentError;
use crate::payments::{DeliveryAck, InitiateRequest, InitiateResponse, TransactionView};
use crate::providers::ProviderKind;
use crate::server::AppState;
use crate::server::util::{header_str, parse_json_body};

pub async fn initiate(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<InitiateResponse>, PaymentError> {
    let request: InitiateRequest = parse_json_body(&body)?;
    let response = app_state
        .payments
        .initiate(ProviderKind::PhonePe, request)
        .await?;
    Ok(Json(response))
}

pub async fn callback(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryAck>, PaymentError> {
    let authorization = header_str(&headers, "authorization");
    let ack = app_state
        .payments
        .handle_phonepe_callback(authorization, &body)
        .await?;
    Ok(Json(ack))
}

pub async fn status(
    State(app_state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionView>, PaymentError> {
    let view = app_state.payments.check_status(&transaction_id).await?;
    Ok(Json(view))
}
