use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::credits::CreditLedger;
use crate::error::PaymentError;
use crate::payments::TransactionView;
use crate::payments::failure::{self, reason_for};
use crate::server::AppState;
use crate::server::util::escape_html;
use crate::transactions::TransactionStatus;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Landing page after the provider redirect. Only SUCCESS renders here;
/// every other state goes to the failure page.
pub async fn verify(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let Some(transaction_id) = query
        .transaction_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        return failure_redirect(None, failure::MISSING_TRANSACTION_ID);
    };

    let view = match app_state.payments.check_status(&transaction_id).await {
        Ok(view) => view,
        Err(PaymentError::NotFound(_)) => {
            return failure_redirect(Some(transaction_id.as_str()), failure::TRANSACTION_NOT_FOUND);
        }
        Err(e) => {
            tracing::error!("Verify of {} failed: {}", transaction_id, e);
            return failure_redirect(Some(transaction_id.as_str()), failure::PAYMENT_ERROR);
        }
    };

    if view.status != TransactionStatus::Success {
        let code = view
            .code
            .clone()
            .unwrap_or_else(|| failure::code_for_status(view.status).to_string());
        return failure_redirect(Some(transaction_id.as_str()), &code);
    }

    let ledger = match app_state.payments.refresh_credits(&view.user_id).await {
        Ok(ledger) => Some(ledger),
        Err(e) => {
            tracing::warn!("Credit refresh for {} failed: {}", view.user_id, e);
            None
        }
    };
    Html(success_page(&view, ledger.as_ref())).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureQuery {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

pub async fn failure(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<FailureQuery>,
) -> Html<String> {
    let code = query.code.unwrap_or_default();
    let transaction_id = query.transaction_id.unwrap_or_default();
    let app = &app_state.config.app;

    let reference = if transaction_id.is_empty() {
        String::new()
    } else {
        format!(
            "<p class=\"ref\">Reference: <code>{}</code></p>",
            escape_html(&transaction_id)
        )
    };
    let subject = if transaction_id.is_empty() {
        "Payment issue".to_string()
    } else {
        format!("Payment issue {}", transaction_id)
    };

    Html(format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Payment failed</title></head>\
         <body><main><h1>Payment not completed</h1><p class=\"reason\">{reason}</p>{reference}\
         <p><a href=\"{retry}\">Try again</a> &middot; \
         <a href=\"mailto:{support}?subject={subject}\">Contact support</a></p></main></body></html>",
        reason = escape_html(reason_for(&code)),
        reference = reference,
        retry = escape_html(&app.retry_path),
        support = escape_html(&app.support_email),
        subject = urlencoding::encode(&subject),
    ))
}

fn success_page(view: &TransactionView, ledger: Option<&CreditLedger>) -> String {
    let balance = match ledger {
        Some(ledger) => format!(
            "<p class=\"credits\">You now have <strong>{}</strong> credits remaining.</p>",
            ledger.remaining()
        ),
        None => "<p class=\"credits\">Your credits will appear shortly.</p>".to_string(),
    };
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Payment successful</title></head>\
         <body><main><h1>Payment successful</h1><p>{plan} &middot; {amount:.2} {currency}</p>{balance}\
         <p class=\"ref\">Reference: <code>{id}</code></p><p><a href=\"/\">Continue</a></p></main></body></html>",
        plan = escape_html(&view.plan_name),
        amount = view.amount,
        currency = view.currency.as_str(),
        balance = balance,
        id = escape_html(&view.transaction_id),
    )
}

fn failure_redirect(transaction_id: Option<&str>, code: &str) -> Response {
    let location = format!(
        "/payment/failure?transactionId={}&code={}",
        urlencoding::encode(transaction_id.unwrap_or_default()),
        urlencoding::encode(code)
    );
    Redirect::to(&location).into_response()
}
