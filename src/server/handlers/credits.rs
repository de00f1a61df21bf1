use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::credits::CreditLedger;
use crate::error::PaymentError;
use crate::payments::TransactionView;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditView {
    pub success: bool,
    #[serde(flatten)]
    pub ledger: CreditLedger,
    pub remaining_credit: i64,
}

impl From<CreditLedger> for CreditView {
    fn from(ledger: CreditLedger) -> Self {
        Self {
            success: true,
            remaining_credit: ledger.remaining(),
            ledger,
        }
    }
}

pub async fn balance(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<CreditView>, PaymentError> {
    let ledger = app_state.payments.credit_balance(&user_id).await?;
    Ok(Json(ledger.into()))
}

pub async fn consume(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<CreditView>, PaymentError> {
    let ledger = app_state.payments.consume_credit(&user_id).await?;
    tracing::debug!(
        "User {} consumed a credit, {} left",
        user_id,
        ledger.remaining()
    );
    Ok(Json(ledger.into()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub success: bool,
    pub transactions: Vec<TransactionView>,
}

pub async fn transactions(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, PaymentError> {
    let transactions = app_state
        .payments
        .user_transactions(
            &user_id,
            query.limit.unwrap_or(20),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(HistoryPage {
        success: true,
        transactions,
    }))
}
