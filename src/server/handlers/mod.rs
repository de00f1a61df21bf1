use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;

use crate::server::AppState;
use crate::server::rate_limit;

mod credits;
mod pages;
mod payment;
mod stripe;

pub fn routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let limited = Router::new()
        .route("/api/payment/initiate", post(payment::initiate))
        .route("/api/payment/callback", post(payment::callback))
        .route(
            "/api/payment/status/{transaction_id}",
            get(payment::status),
        )
        .route(
            "/api/stripe/create-checkout-session",
            post(stripe::create_checkout_session),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state,
            rate_limit::enforce,
        ));

    Router::new()
        .merge(limited)
        .route("/api/stripe/webhook", post(stripe::webhook))
        .route("/api/credits/{user_id}", get(credits::balance))
        .route("/api/credits/{user_id}/consume", post(credits::consume))
        .route("/api/transactions/{user_id}", get(credits::transactions))
        .route("/payment/verify", get(pages::verify))
        .route("/payment/failure", get(pages::failure))
        .route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::Settings;
    use crate::payments::test_support::{Harness, harness, signed_stripe_event};
    use crate::providers::ProviderOutcome;
    use crate::server::{AppState, build_router};

    fn app_with(h: &Harness, settings: Settings) -> axum::Router {
        build_router(Arc::new(AppState {
            config: settings,
            payments: h.service.clone(),
            rate_limits: h.stores.rate_limits.clone(),
        }))
    }

    fn app(h: &Harness) -> axum::Router {
        app_with(h, Settings::default())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(res: axum::response::Response) -> String {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(res: &axum::response::Response) -> &str {
        res.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    const WEEKLY_INR: &str =
        r#"{"amount":500,"currency":"INR","planName":"Weekly Plan","userId":"u1"}"#;

    async fn initiate(app: &axum::Router) -> String {
        let res = app
            .clone()
            .oneshot(post_json("/api/payment/initiate", WEEKLY_INR))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        body["transactionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness().await;
        let res = app(&h).oneshot(get("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ok");
    }

    #[tokio::test]
    async fn phonepe_initiate_then_poll_status() {
        let h = harness().await;
        let app = app(&h);
        let id = initiate(&app).await;
        assert!(id.starts_with("TXN_U1_"));

        let res = app
            .clone()
            .oneshot(get(&format!("/api/payment/status/{}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let view = json_body(res).await;
        assert_eq!(view["status"], "PENDING");
        assert_eq!(view["provider"], "phonepe");
        assert_eq!(view["planName"], "Weekly Plan");

        h.phonepe.set_outcome(ProviderOutcome::Success, Some("OM-T-1"));
        let res = app
            .oneshot(get(&format!("/api/payment/status/{}", id)))
            .await
            .unwrap();
        let view = json_body(res).await;
        assert_eq!(view["status"], "SUCCESS");
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 50);
    }

    #[tokio::test]
    async fn bad_initiate_requests_are_400() {
        let h = harness().await;
        let app = app(&h);
        for body in [
            r#"{"amount":5,"currency":"USD","planName":"Weekly Plan","userId":"u1"}"#,
            r#"{"amount":5,"currency":"INR","planName":"Weekly Plan"}"#,
            r#"{"amount":"#,
            "",
        ] {
            let res = app
                .clone()
                .oneshot(post_json("/api/payment/initiate", body))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            assert_eq!(json_body(res).await["error"]["code"], "validation_error");
        }
        assert_eq!(
            h.phonepe
                .checkout_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn unknown_transaction_is_404() {
        let h = harness().await;
        let res = app(&h)
            .oneshot(get("/api/payment/status/TXN_NOPE"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn stripe_checkout_and_webhook_grant_credits() {
        let h = harness().await;
        let app = app(&h);
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/stripe/create-checkout-session",
                r#"{"amount":19.99,"planName":"Monthly Plan","userId":"u9"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let created = json_body(res).await;
        assert_eq!(created["provider"], "stripe");
        let id = created["transactionId"].as_str().unwrap().to_string();

        let (payload, signature) = signed_stripe_event(
            "evt_router",
            "checkout.session.completed",
            json!({
                "id": "cs_router",
                "status": "complete",
                "payment_status": "paid",
                "payment_intent": "pi_router",
                "client_reference_id": id,
                "metadata": {"userId": "u9", "planName": "Monthly Plan", "merchantTransactionId": id}
            }),
        );
        let webhook = |payload: Vec<u8>, signature: String| {
            Request::builder()
                .method("POST")
                .uri("/api/stripe/webhook")
                .header("stripe-signature", signature)
                .body(Body::from(payload))
                .unwrap()
        };

        let res = app
            .clone()
            .oneshot(webhook(payload.clone(), signature.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["creditsGranted"], 200);

        let res = app
            .clone()
            .oneshot(webhook(payload, signature))
            .await
            .unwrap();
        assert_eq!(json_body(res).await["duplicate"], true);

        let res = app.oneshot(get("/api/credits/u9")).await.unwrap();
        let credits = json_body(res).await;
        assert_eq!(credits["totalCredit"], 200);
        assert_eq!(credits["remainingCredit"], 200);
    }

    #[tokio::test]
    async fn forged_webhook_is_rejected() {
        let h = harness().await;
        let (payload, _) = signed_stripe_event(
            "evt_forged",
            "checkout.session.completed",
            json!({"id": "cs_x"}),
        );
        let forged = format!("t={},v1={}", chrono::Utc::now().timestamp(), "00".repeat(32));
        let res = app(&h)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stripe/webhook")
                    .header("stripe-signature", forged)
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "invalid_signature");
    }

    #[tokio::test]
    async fn consume_without_credits_is_402() {
        let h = harness().await;
        let app = app(&h);
        let res = app
            .clone()
            .oneshot(post_json("/api/credits/u5/consume", ""))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);

        h.stores.credits.grant_credits("u5", 2).await.unwrap();
        let res = app
            .oneshot(post_json("/api/credits/u5/consume", ""))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let credits = json_body(res).await;
        assert_eq!(credits["usedCredit"], 1);
        assert_eq!(credits["remainingCredit"], 1);
    }

    #[tokio::test]
    async fn history_lists_user_transactions() {
        let h = harness().await;
        let app = app(&h);
        initiate(&app).await;
        initiate(&app).await;
        let res = app
            .oneshot(get("/api/transactions/u1?limit=1"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let page = json_body(res).await;
        assert_eq!(page["transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verify_routes_by_status() {
        let h = harness().await;
        let app = app(&h);

        let res = app.clone().oneshot(get("/payment/verify")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert!(location(&res).ends_with("code=MISSING_TRANSACTION_ID"));

        let res = app
            .clone()
            .oneshot(get("/payment/verify?transactionId=TXN_GONE"))
            .await
            .unwrap();
        assert_eq!(
            location(&res),
            "/payment/failure?transactionId=TXN_GONE&code=TRANSACTION_NOT_FOUND"
        );

        let id = initiate(&app).await;
        let res = app
            .clone()
            .oneshot(get(&format!("/payment/verify?transactionId={}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert!(location(&res).ends_with("code=PAYMENT_PENDING"));

        h.phonepe.set_outcome(ProviderOutcome::Success, Some("OM-T-2"));
        let res = app
            .oneshot(get(&format!("/payment/verify?transactionId={}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let page = text_body(res).await;
        assert!(page.contains("Payment successful"));
        assert!(page.contains("<strong>50</strong>"));
    }

    #[tokio::test]
    async fn declined_payment_redirects_with_provider_code() {
        let h = harness().await;
        let app = app(&h);
        let id = initiate(&app).await;
        h.phonepe.set_outcome(ProviderOutcome::Failed, None);
        let res = app
            .oneshot(get(&format!("/payment/verify?transactionId={}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert!(location(&res).ends_with("code=PAYMENT_DECLINED"));
    }

    #[tokio::test]
    async fn failure_page_explains_and_escapes() {
        let h = harness().await;
        let res = app(&h)
            .oneshot(get(
                "/payment/failure?transactionId=%3Cb%3Ex%3C%2Fb%3E&code=PAYMENT_DECLINED",
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let page = text_body(res).await;
        assert!(page.contains("Your payment was declined by the bank."));
        assert!(page.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(!page.contains("<b>x</b>"));
        assert!(page.contains("href=\"/pricing\""));
        assert!(page.contains("mailto:support@example.com"));

        let res = app(&h)
            .oneshot(get("/payment/failure?code=SOMETHING_NEW"))
            .await
            .unwrap();
        assert!(text_body(res).await.contains("Your payment could not be completed."));
    }

    #[tokio::test]
    async fn initiation_is_rate_limited_per_client() {
        let h = harness().await;
        let mut settings = Settings::default();
        settings.rate_limit.max_requests = 2;
        settings.rate_limit.window_secs = 3600;
        let app = app_with(&h, settings);
        let from = |ip: &str| {
            Request::builder()
                .uri("/api/payment/status/TXN_NOPE")
                .header("x-forwarded-for", ip.to_string())
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            let res = app.clone().oneshot(from("203.0.113.5")).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
        }
        let res = app.clone().oneshot(from("203.0.113.5")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(res).await["error"]["code"], "rate_limited");

        let res = app.clone().oneshot(from("198.51.100.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        // health is outside the limited group
        let res = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
