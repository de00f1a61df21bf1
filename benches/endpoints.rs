use std::hint::black_box;

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};

use credit_gateway::payments::merchant_id;
use credit_gateway::providers::stripe::{WebhookVerifier, compute_signature};

const SECRET: &str = "whsec_bench";

fn webhook_payload() -> Vec<u8> {
    serde_json::json!({
        "id": "evt_bench",
        "type": "checkout.session.completed",
        "created": 1_700_000_000,
        "data": { "object": {
            "id": "cs_bench",
            "status": "complete",
            "payment_status": "paid",
            "client_reference_id": "TXN_BENCH_1700000000000_ABC123",
            "metadata": {
                "userId": "bench-user",
                "planName": "Monthly Plan",
                "merchantTransactionId": "TXN_BENCH_1700000000000_ABC123"
            }
        }}
    })
    .to_string()
    .into_bytes()
}

fn bench_webhook_verification(c: &mut Criterion) {
    let payload = webhook_payload();
    let now = Utc::now().timestamp();
    let header = format!("t={},v1={}", now, compute_signature(SECRET, now, &payload));
    let verifier = WebhookVerifier::new(SECRET, 300);

    c.bench_function("stripe_webhook_verify", |b| {
        b.iter(|| {
            verifier
                .verify(black_box(&payload), black_box(&header), now)
                .is_ok()
        })
    });

    let rotated = format!(
        "t={},v1={},v1={}",
        now,
        "0".repeat(64),
        compute_signature(SECRET, now, &payload)
    );
    c.bench_function("stripe_webhook_verify_rotated_secret", |b| {
        b.iter(|| {
            verifier
                .verify(black_box(&payload), black_box(&rotated), now)
                .is_ok()
        })
    });
}

fn bench_merchant_id(c: &mut Criterion) {
    let now = Utc::now();
    c.bench_function("merchant_id_generate", |b| {
        b.iter(|| merchant_id::generate(black_box("user-1234-abcd"), now))
    });
}

criterion_group!(benches, bench_webhook_verification, bench_merchant_id);
criterion_main!(benches);
