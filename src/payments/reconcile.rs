use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::settings::PaymentsConfig;
use crate::error::PaymentError;
use crate::payments::{PaymentService, failure, settlement_from};
use crate::providers::ProviderStatus;
use crate::transactions::{SettleOutcome, Settlement, TransactionRecord, TransactionStatus};

const SWEEP_BATCH: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub settled: usize,
    pub expired: usize,
    /// Records left PENDING because the provider could not be reached.
    pub skipped: usize,
}

enum Poll {
    Answered(ProviderStatus),
    NoSession,
    Unreachable,
}

impl PaymentService {
    /// Resolves PENDING records created before `now - max_age`: a terminal
    /// provider answer is applied, anything else expires the record.
    pub async fn reconcile_stale(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Result<ReconcileReport, PaymentError> {
        let stale = self
            .stores
            .transactions
            .list_stale_pending(now - max_age, SWEEP_BATCH)
            .await?;
        let mut report = ReconcileReport::default();

        for record in stale {
            report.examined += 1;
            let settlement = match self.poll(&record).await {
                Poll::Answered(status) if status.outcome.is_terminal() => {
                    settlement_from(&status, "reconcile")
                }
                Poll::Unreachable => {
                    report.skipped += 1;
                    continue;
                }
                Poll::Answered(_) | Poll::NoSession => expired_settlement(now),
            };
            match self.settle(&record.merchant_transaction_id, settlement).await {
                Ok(SettleOutcome::Settled { record, .. }) => {
                    if record.status == TransactionStatus::Expired {
                        report.expired += 1;
                    } else {
                        report.settled += 1;
                    }
                }
                Ok(SettleOutcome::AlreadySettled(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        "Reconcile of {} failed: {}",
                        record.merchant_transaction_id,
                        e
                    );
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    async fn poll(&self, record: &TransactionRecord) -> Poll {
        if record.provider_session_id.is_none() {
            return Poll::NoSession;
        }
        let Ok(provider) = self.providers.get(record.provider) else {
            return Poll::NoSession;
        };
        match provider.fetch_status(record).await {
            Ok(status) => Poll::Answered(status),
            Err(e) => {
                tracing::warn!(
                    "Status check for stale {} failed: {}",
                    record.merchant_transaction_id,
                    e
                );
                Poll::Unreachable
            }
        }
    }
}

fn expired_settlement(now: DateTime<Utc>) -> Settlement {
    let mut settlement = Settlement::new(TransactionStatus::Expired);
    settlement.metadata = json!({
        "settledBy": "reconcile",
        "failureCode": failure::TIMED_OUT,
        "expiredAt": now.to_rfc3339(),
    });
    settlement
}

/// Runs [`PaymentService::reconcile_stale`] every `reconcile_interval_secs`.
pub fn spawn_reconciler(service: Arc<PaymentService>, config: &PaymentsConfig) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.reconcile_interval_secs.max(1));
    let max_age = chrono::Duration::minutes(config.pending_expiry_minutes.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.reconcile_stale(Utc::now(), max_age).await {
                Ok(report) if report.examined > 0 => tracing::info!(
                    "Reconciled {} stale transactions: {} settled, {} expired, {} skipped",
                    report.examined,
                    report.settled,
                    report.expired,
                    report.skipped
                ),
                Ok(_) => {}
                Err(e) => tracing::error!("Reconcile sweep failed: {}", e),
            }
        }
    })
}
