use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use crate::error::PaymentError;
use crate::payments::PaymentService;
use crate::providers::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, ProviderKind, ProviderOutcome,
    ProviderRegistry, ProviderStatus,
};
use crate::server::credit_cache::CreditCache;
use crate::storage::{SqliteStore, Stores};
use crate::transactions::{Currency, TransactionRecord, TransactionStatus, TransactionStore};

/// Scriptable provider that records what it was asked.
pub(crate) struct FakeProvider {
    kind: ProviderKind,
    currency: Currency,
    pub fail_checkout: AtomicBool,
    pub fail_status: AtomicBool,
    status: Mutex<ProviderStatus>,
    pub checkout_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    store: Option<Arc<dyn TransactionStore>>,
    /// Status of our record at the moment the provider was called.
    pub seen_at_checkout: Mutex<Vec<Option<TransactionStatus>>>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind, currency: Currency) -> Self {
        Self {
            kind,
            currency,
            fail_checkout: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            status: Mutex::new(ProviderStatus::pending(json!({"state": "PENDING"}))),
            checkout_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            store: None,
            seen_at_checkout: Mutex::new(Vec::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TransactionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_outcome(&self, outcome: ProviderOutcome, provider_transaction_id: Option<&str>) {
        let mut status = self.status.lock().unwrap();
        status.outcome = outcome;
        status.provider_transaction_id = provider_transaction_id.map(String::from);
        status.payment_method = Some("UPI".into());
        status.failure_code = match outcome {
            ProviderOutcome::Failed => Some("PAYMENT_DECLINED".into()),
            _ => None,
        };
    }
}

#[async_trait]
impl CheckoutProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        currency == self.currency
    }

    fn default_currency(&self) -> Currency {
        self.currency
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(store) = &self.store {
            let seen = store
                .get_transaction(&request.merchant_transaction_id)
                .await?
                .map(|r| r.status);
            self.seen_at_checkout.lock().unwrap().push(seen);
        }
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(PaymentError::provider(
                self.kind.as_str(),
                "card network unreachable",
            ));
        }
        Ok(CheckoutSession {
            session_id: format!("sess_{}", request.merchant_transaction_id),
            redirect_url: format!("https://pay.test/{}", request.merchant_transaction_id),
            raw: json!({"fake": true}),
        })
    }

    async fn fetch_status(
        &self,
        _record: &TransactionRecord,
    ) -> Result<ProviderStatus, PaymentError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(PaymentError::provider(self.kind.as_str(), "status api down"));
        }
        Ok(self.status.lock().unwrap().clone())
    }
}

pub(crate) struct Harness {
    pub _dir: TempDir,
    pub stores: Stores,
    pub phonepe: Arc<FakeProvider>,
    pub stripe: Arc<FakeProvider>,
    pub service: Arc<PaymentService>,
}

pub(crate) const WEBHOOK_SECRET: &str = "whsec_test_harness";

/// SQLite-backed service with fake PhonePe (INR) and Stripe (CAD) adapters.
pub(crate) async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("payments.db");
    let store = Arc::new(SqliteStore::open(db_path.to_str().unwrap()).await.unwrap());
    let stores = Stores::from_backend(store);
    let phonepe = Arc::new(
        FakeProvider::new(ProviderKind::PhonePe, Currency::Inr)
            .with_store(stores.transactions.clone()),
    );
    let stripe = Arc::new(
        FakeProvider::new(ProviderKind::Stripe, Currency::Cad)
            .with_store(stores.transactions.clone()),
    );
    let registry = ProviderRegistry::default()
        .with(phonepe.clone())
        .with(stripe.clone());
    let service = PaymentService::new(
        stores.clone(),
        registry,
        Arc::new(CreditCache::new(Duration::from_secs(30))),
    )
    .with_stripe_webhook(crate::providers::stripe::WebhookVerifier::new(
        WEBHOOK_SECRET,
        300,
    ));
    Harness {
        _dir: dir,
        stores,
        phonepe,
        stripe,
        service: Arc::new(service),
    }
}

/// A signed Stripe webhook body for a checkout session event.
pub(crate) fn signed_stripe_event(
    event_id: &str,
    event_type: &str,
    session: serde_json::Value,
) -> (Vec<u8>, String) {
    let payload = json!({
        "id": event_id,
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": { "object": session }
    })
    .to_string()
    .into_bytes();
    let t = chrono::Utc::now().timestamp();
    let header = format!(
        "t={},v1={}",
        t,
        crate::providers::stripe::compute_signature(WEBHOOK_SECRET, t, &payload)
    );
    (payload, header)
}
