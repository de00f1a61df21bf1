use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::error::PaymentError;
use crate::payments::{PaymentService, failure, settlement_from};
use crate::providers::phonepe::{self, state_outcome};
use crate::providers::stripe;
use crate::providers::{ProviderKind, ProviderOutcome, ProviderStatus};
use crate::transactions::{SettleOutcome, Settlement, TransactionStatus};

/// Acknowledgement returned to the provider for a delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAck {
    pub received: bool,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    pub credits_granted: i64,
}

impl DeliveryAck {
    fn ignored() -> Self {
        Self {
            received: true,
            duplicate: false,
            transaction_id: None,
            status: None,
            credits_granted: 0,
        }
    }

    fn duplicate(merchant_transaction_id: &str) -> Self {
        Self {
            duplicate: true,
            transaction_id: Some(merchant_transaction_id.to_string()),
            ..Self::ignored()
        }
    }

    fn pending(merchant_transaction_id: &str) -> Self {
        Self {
            transaction_id: Some(merchant_transaction_id.to_string()),
            status: Some(TransactionStatus::Pending),
            ..Self::ignored()
        }
    }

    fn applied(outcome: &SettleOutcome) -> Self {
        let record = outcome.record();
        Self {
            transaction_id: Some(record.merchant_transaction_id.clone()),
            status: Some(record.status),
            credits_granted: outcome.credits_granted(),
            ..Self::ignored()
        }
    }
}

impl PaymentService {
    /// Verifies, de-duplicates and applies a Stripe webhook delivery.
    pub async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<DeliveryAck, PaymentError> {
        let verifier = self
            .stripe_webhook
            .as_ref()
            .ok_or_else(|| PaymentError::Unavailable("Stripe webhook verification".into()))?;
        let signature = signature
            .ok_or_else(|| PaymentError::Signature("missing stripe-signature header".into()))?;
        if let Err(e) = verifier.verify(payload, signature, Utc::now().timestamp()) {
            tracing::warn!("Rejected Stripe webhook: {}", e);
            return Err(e);
        }

        let event = stripe::parse_event(payload)?;
        let Some(session_event) = event
            .session_event()
            .map_err(|e| PaymentError::Validation(format!("malformed checkout session: {}", e)))?
        else {
            tracing::debug!("Ignoring Stripe event {} ({})", event.id, event.event_type);
            return Ok(DeliveryAck::ignored());
        };

        let session = session_event.session();
        let (Some(user_id), Some(plan_name), Some(merchant_transaction_id)) = (
            session.metadata_value("userId"),
            session.metadata_value("planName"),
            session.metadata_value("merchantTransactionId"),
        ) else {
            return Err(PaymentError::Validation(
                "checkout session metadata must include userId, planName and merchantTransactionId"
                    .into(),
            ));
        };

        if self
            .stores
            .events
            .is_event_processed(ProviderKind::Stripe, &event.id)
            .await?
        {
            tracing::info!("Duplicate Stripe event {} for {}", event.id, merchant_transaction_id);
            return Ok(DeliveryAck::duplicate(merchant_transaction_id));
        }

        let record = self.find(merchant_transaction_id).await?;
        if record.user_id != user_id {
            tracing::warn!(
                "Stripe event {} names user {} but {} belongs to {}",
                event.id,
                user_id,
                merchant_transaction_id,
                record.user_id
            );
            return Err(PaymentError::Validation(
                "session user does not match the transaction".into(),
            ));
        }
        if record.plan_name != plan_name {
            tracing::warn!(
                "Stripe event {} names plan `{}`, transaction {} was for `{}`",
                event.id,
                plan_name,
                merchant_transaction_id,
                record.plan_name
            );
        }

        let outcome = session_event.outcome();
        if !outcome.is_terminal() {
            tracing::info!(
                "Stripe session {} completed without payment yet; waiting for async result",
                session.id
            );
            return Ok(DeliveryAck::pending(merchant_transaction_id));
        }

        let mut metadata = json!({
            "settledBy": "stripe_webhook",
            "stripeEventId": event.id,
            "stripeEventType": event.event_type,
            "stripeSession": event.data.object,
        });
        match outcome {
            ProviderOutcome::Failed => metadata["failureCode"] = json!(failure::PAYMENT_ERROR),
            ProviderOutcome::Expired => metadata["failureCode"] = json!(failure::TIMED_OUT),
            _ => {}
        }
        let settlement = Settlement {
            status: outcome.status(),
            provider_transaction_id: session.payment_intent.clone(),
            payment_method: session.payment_method_types.first().cloned(),
            metadata,
        };
        let result = self.settle(merchant_transaction_id, settlement).await?;
        self.stores
            .events
            .mark_event_processed(ProviderKind::Stripe, &event.id, Some(merchant_transaction_id))
            .await?;
        Ok(DeliveryAck::applied(&result))
    }

    /// Decodes and applies a PhonePe server-to-server callback. Without
    /// configured callback credentials the claimed state is not trusted and
    /// the order status is fetched from PhonePe instead.
    pub async fn handle_phonepe_callback(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<DeliveryAck, PaymentError> {
        let callback = phonepe::parse_callback(body)?;
        if let (Some(expected), Some(claimed)) = (
            self.phonepe_merchant_id.as_deref(),
            callback.merchant_id.as_deref(),
        ) {
            if expected != claimed {
                tracing::warn!(
                    "Rejected PhonePe callback for {}: sent for merchant {}",
                    callback.merchant_transaction_id,
                    claimed
                );
                return Err(PaymentError::Validation(format!(
                    "callback is for merchant {}",
                    claimed
                )));
            }
        }
        let record = self.find(&callback.merchant_transaction_id).await?;
        let event_key = callback.event_key();

        if self
            .stores
            .events
            .is_event_processed(ProviderKind::PhonePe, &event_key)
            .await?
        {
            tracing::info!("Duplicate PhonePe callback {}", event_key);
            return Ok(DeliveryAck::duplicate(&record.merchant_transaction_id));
        }

        let status = match &self.phonepe_callback_auth {
            Some(auth) => {
                if !auth.verify(authorization) {
                    tracing::warn!(
                        "Rejected PhonePe callback for {}: bad authorization",
                        record.merchant_transaction_id
                    );
                    return Err(PaymentError::Signature(
                        "invalid PhonePe callback authorization".into(),
                    ));
                }
                let outcome = state_outcome(&callback.state);
                ProviderStatus {
                    outcome,
                    provider_transaction_id: callback.provider_transaction_id.clone(),
                    payment_method: callback.payment_method.clone(),
                    failure_code: (outcome != ProviderOutcome::Success)
                        .then(|| callback.state.to_ascii_uppercase()),
                    raw: callback.raw.clone(),
                }
            }
            None => {
                tracing::debug!(
                    "Confirming PhonePe callback {} for {} via order status",
                    callback.event.as_deref().unwrap_or(&callback.state),
                    record.merchant_transaction_id
                );
                self.providers
                    .get(ProviderKind::PhonePe)?
                    .fetch_status(&record)
                    .await?
            }
        };

        if !status.outcome.is_terminal() {
            return Ok(DeliveryAck::pending(&record.merchant_transaction_id));
        }
        let result = self
            .settle(
                &record.merchant_transaction_id,
                settlement_from(&status, "phonepe_callback"),
            )
            .await?;
        self.stores
            .events
            .mark_event_processed(
                ProviderKind::PhonePe,
                &event_key,
                Some(&record.merchant_transaction_id),
            )
            .await?;
        Ok(DeliveryAck::applied(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::test_support::{harness, signed_stripe_event};
    use crate::payments::{InitiateRequest, InitiateResponse};
    use crate::providers::phonepe::callback::callback_digest;
    use serde_json::Value;
    use std::sync::atomic::Ordering;

    async fn open_stripe(
        h: &crate::payments::test_support::Harness,
        user: &str,
        plan: &str,
    ) -> InitiateResponse {
        h.service
            .initiate(
                ProviderKind::Stripe,
                InitiateRequest {
                    amount: Some(29.0),
                    currency: Some("CAD".into()),
                    plan_name: Some(plan.into()),
                    user_id: Some(user.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    async fn open_phonepe(h: &crate::payments::test_support::Harness, user: &str) -> InitiateResponse {
        h.service
            .initiate(
                ProviderKind::PhonePe,
                InitiateRequest {
                    amount: Some(500.0),
                    currency: Some("INR".into()),
                    plan_name: Some("Weekly Plan".into()),
                    user_id: Some(user.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    fn paid_session(merchant_id: &str, user: &str, plan: &str) -> Value {
        json!({
            "id": "cs_test_paid",
            "status": "complete",
            "payment_status": "paid",
            "payment_intent": "pi_123",
            "payment_method_types": ["card"],
            "client_reference_id": merchant_id,
            "metadata": {"userId": user, "planName": plan, "merchantTransactionId": merchant_id}
        })
    }

    #[tokio::test]
    async fn completed_session_grants_plan_credits() {
        let h = harness().await;
        let tx = open_stripe(&h, "u1", "Monthly Plan").await;
        let (payload, header) = signed_stripe_event(
            "evt_1",
            "checkout.session.completed",
            paid_session(&tx.transaction_id, "u1", "Monthly Plan"),
        );

        let ack = h
            .service
            .handle_stripe_webhook(&payload, Some(header.as_str()))
            .await
            .unwrap();
        assert_eq!(ack.status, Some(TransactionStatus::Success));
        assert_eq!(ack.credits_granted, 200);

        let record = h
            .stores
            .transactions
            .get_transaction(&tx.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Success);
        assert_eq!(record.provider_transaction_id.as_deref(), Some("pi_123"));
        assert_eq!(record.payment_method.as_deref(), Some("card"));
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 200);
    }

    #[tokio::test]
    async fn redelivered_event_grants_once() {
        let h = harness().await;
        let tx = open_stripe(&h, "u1", "Weekly Plan").await;
        let (payload, header) = signed_stripe_event(
            "evt_dup",
            "checkout.session.completed",
            paid_session(&tx.transaction_id, "u1", "Weekly Plan"),
        );
        let first = h.service.handle_stripe_webhook(&payload, Some(header.as_str())).await.unwrap();
        let second = h.service.handle_stripe_webhook(&payload, Some(header.as_str())).await.unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);

        // a different event id for the same session is also harmless
        let (payload, header) = signed_stripe_event(
            "evt_other",
            "checkout.session.async_payment_succeeded",
            paid_session(&tx.transaction_id, "u1", "Weekly Plan"),
        );
        let third = h.service.handle_stripe_webhook(&payload, Some(header.as_str())).await.unwrap();
        assert_eq!(third.credits_granted, 0);
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 50);
    }

    #[tokio::test]
    async fn bad_signature_leaves_record_untouched() {
        let h = harness().await;
        let tx = open_stripe(&h, "u1", "Monthly Plan").await;
        let (payload, _) = signed_stripe_event(
            "evt_forged",
            "checkout.session.completed",
            paid_session(&tx.transaction_id, "u1", "Monthly Plan"),
        );
        let t = Utc::now().timestamp();
        let forged = format!(
            "t={},v1={}",
            t,
            stripe::compute_signature("whsec_attacker", t, &payload)
        );

        let err = h
            .service
            .handle_stripe_webhook(&payload, Some(forged.as_str()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        let err = h.service.handle_stripe_webhook(&payload, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));

        let record = h
            .stores
            .transactions
            .get_transaction(&tx.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 0);
    }

    #[tokio::test]
    async fn missing_metadata_is_rejected() {
        let h = harness().await;
        let tx = open_stripe(&h, "u1", "Monthly Plan").await;
        let mut session = paid_session(&tx.transaction_id, "u1", "Monthly Plan");
        session["metadata"] = json!({"merchantTransactionId": tx.transaction_id});
        let (payload, header) = signed_stripe_event("evt_nometa", "checkout.session.completed", session);
        let err = h
            .service
            .handle_stripe_webhook(&payload, Some(header.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn client_reference_alone_does_not_identify_the_payment() {
        let h = harness().await;
        let tx = open_stripe(&h, "u1", "Monthly Plan").await;
        let mut session = paid_session(&tx.transaction_id, "u1", "Monthly Plan");
        session["metadata"] = json!({"userId": "u1", "planName": "Monthly Plan"});
        let (payload, header) =
            signed_stripe_event("evt_refonly", "checkout.session.completed", session);
        let err = h
            .service
            .handle_stripe_webhook(&payload, Some(header.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        let record = h
            .stores
            .transactions
            .get_transaction(&tx.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 0);
    }

    #[tokio::test]
    async fn mismatched_user_is_rejected() {
        let h = harness().await;
        let tx = open_stripe(&h, "u1", "Monthly Plan").await;
        let (payload, header) = signed_stripe_event(
            "evt_mismatch",
            "checkout.session.completed",
            paid_session(&tx.transaction_id, "someone-else", "Monthly Plan"),
        );
        let err = h
            .service
            .handle_stripe_webhook(&payload, Some(header.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(h.stores.credits.get_ledger("someone-else").await.unwrap().total_credit, 0);
    }

    #[tokio::test]
    async fn unknown_transaction_in_webhook_is_not_found() {
        let h = harness().await;
        let (payload, header) = signed_stripe_event(
            "evt_ghost",
            "checkout.session.completed",
            paid_session("TXN_GHOST_1_AAAAAA", "u1", "Monthly Plan"),
        );
        let err = h
            .service
            .handle_stripe_webhook(&payload, Some(header.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_session_marks_transaction_expired() {
        let h = harness().await;
        let tx = open_stripe(&h, "u4", "Weekly Plan").await;
        let mut session = paid_session(&tx.transaction_id, "u4", "Weekly Plan");
        session["status"] = json!("expired");
        session["payment_status"] = json!("unpaid");
        let (payload, header) = signed_stripe_event("evt_exp", "checkout.session.expired", session);
        let ack = h.service.handle_stripe_webhook(&payload, Some(header.as_str())).await.unwrap();
        assert_eq!(ack.status, Some(TransactionStatus::Expired));
        let view = h.service.check_status(&tx.transaction_id).await.unwrap();
        assert_eq!(view.code.as_deref(), Some("TIMED_OUT"));
    }

    #[tokio::test]
    async fn unrelated_events_are_acknowledged() {
        let h = harness().await;
        let (payload, header) =
            signed_stripe_event("evt_inv", "invoice.paid", json!({"id": "in_1"}));
        let ack = h.service.handle_stripe_webhook(&payload, Some(header.as_str())).await.unwrap();
        assert!(ack.received);
        assert!(ack.status.is_none());
    }

    #[tokio::test]
    async fn unauthenticated_callback_is_confirmed_with_provider() {
        let h = harness().await;
        let tx = open_phonepe(&h, "u1").await;
        // the callback claims success but PhonePe still reports pending
        let body = json!({"merchantTransactionId": tx.transaction_id, "state": "COMPLETED"}).to_string();
        let ack = h.service.handle_phonepe_callback(None, body.as_bytes()).await.unwrap();
        assert_eq!(ack.status, Some(TransactionStatus::Pending));
        assert_eq!(h.phonepe.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 0);

        h.phonepe.set_outcome(ProviderOutcome::Success, Some("OM-T-7"));
        let ack = h.service.handle_phonepe_callback(None, body.as_bytes()).await.unwrap();
        assert_eq!(ack.status, Some(TransactionStatus::Success));
        assert_eq!(ack.credits_granted, 50);

        let again = h.service.handle_phonepe_callback(None, body.as_bytes()).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(h.stores.credits.get_ledger("u1").await.unwrap().total_credit, 50);
    }

    #[tokio::test]
    async fn callback_for_another_merchant_is_refused() {
        let h = harness().await;
        let service = PaymentService::new(
            h.stores.clone(),
            crate::providers::ProviderRegistry::default().with(h.phonepe.clone()),
            std::sync::Arc::new(crate::server::credit_cache::CreditCache::new(
                std::time::Duration::from_secs(30),
            )),
        )
        .with_phonepe_merchant_id("M_OURS");
        let tx = open_phonepe(&h, "u3").await;
        h.phonepe.set_outcome(ProviderOutcome::Success, Some("OM-T-3"));

        let foreign = json!({"merchantId": "M_OTHER", "merchantTransactionId": tx.transaction_id,
                             "state": "COMPLETED"})
        .to_string();
        let err = service
            .handle_phonepe_callback(None, foreign.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(h.phonepe.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.stores.credits.get_ledger("u3").await.unwrap().total_credit, 0);

        let ours = json!({"merchantId": "M_OURS", "merchantTransactionId": tx.transaction_id,
                          "state": "COMPLETED"})
        .to_string();
        let ack = service.handle_phonepe_callback(None, ours.as_bytes()).await.unwrap();
        assert_eq!(ack.status, Some(TransactionStatus::Success));
    }

    #[tokio::test]
    async fn authenticated_callback_is_trusted() {
        let h = harness().await;
        let service = PaymentService::new(
            h.stores.clone(),
            crate::providers::ProviderRegistry::default().with(h.phonepe.clone()),
            std::sync::Arc::new(crate::server::credit_cache::CreditCache::new(
                std::time::Duration::from_secs(30),
            )),
        )
        .with_phonepe_callback_auth(phonepe::CallbackAuth::new("merchant", "pw"));
        let tx = open_phonepe(&h, "u2").await;
        let body = json!({
            "event": "checkout.order.completed",
            "payload": {"merchantOrderId": tx.transaction_id, "state": "COMPLETED",
                        "paymentDetails": [{"transactionId": "OM-T-2", "paymentMode": "UPI_QR"}]}
        })
        .to_string();

        let err = service
            .handle_phonepe_callback(Some("wrong"), body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));

        let digest = callback_digest("merchant", "pw");
        let ack = service
            .handle_phonepe_callback(Some(digest.as_str()), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(ack.status, Some(TransactionStatus::Success));
        assert_eq!(h.phonepe.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.stores.credits.get_ledger("u2").await.unwrap().total_credit, 50);
    }

    #[tokio::test]
    async fn callback_for_unknown_transaction_is_not_found() {
        let h = harness().await;
        let body = json!({"merchantTransactionId": "TXN_NONE_1_ZZZZZZ", "state": "COMPLETED"}).to_string();
        let err = h
            .service
            .handle_phonepe_callback(None, body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }
}
