use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::credits::CreditLedger;

/// Per-instance read cache of credit views. Entries expire after `ttl` and are
/// dropped whenever the ledger changes through this instance.
pub struct CreditCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (CreditLedger, Instant)>>,
}

impl CreditCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<CreditLedger> {
        let entries = self.entries.read().await;
        entries
            .get(user_id)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(ledger, _)| ledger.clone())
    }

    pub async fn put(&self, ledger: CreditLedger) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().await;
        // keep the map from growing with dead entries
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() < self.ttl);
        entries.insert(ledger.user_id.clone(), (ledger, Instant::now()));
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.entries.write().await.remove(user_id);
    }
}
