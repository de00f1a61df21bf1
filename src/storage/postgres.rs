use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_postgres::{Client, NoTls};

use crate::error::PaymentError;

pub struct PgPool {
    clients: Vec<Arc<Client>>,
    next: AtomicUsize,
}

impl PgPool {
    async fn connect_many(
        pg_url: &str,
        schema: &Option<String>,
        size: usize,
    ) -> Result<Self, PaymentError> {
        let mut clients = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            let (client, connection) = tokio_postgres::connect(pg_url, NoTls)
                .await
                .map_err(|e| PaymentError::Config(format!("Failed to connect postgres: {}", e)))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!("postgres connection error: {}", e);
                }
            });
            if let Some(s) = schema {
                client
                    .execute(&format!("SET search_path TO {}", s), &[])
                    .await
                    .map_err(|e| {
                        PaymentError::Config(format!("Failed to set search_path: {}", e))
                    })?;
            }
            let client = Arc::new(client);
            spawn_keepalive(Arc::clone(&client), 240, 420);
            clients.push(client);
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn pick(&self) -> Arc<Client> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len().max(1);
        Arc::clone(&self.clients[idx])
    }
}

// Jittered keepalive so idle connections survive proxies; errors are ignored.
fn spawn_keepalive(client: Arc<Client>, min_secs: u64, max_secs: u64) {
    let max_secs = max_secs.max(min_secs + 1);
    tokio::spawn(async move {
        loop {
            let jitter = {
                let mut rng = rand::rng();
                rand::Rng::random_range(&mut rng, min_secs..=max_secs)
            };
            tokio::time::sleep(std::time::Duration::from_secs(jitter)).await;
            if client.is_closed() {
                break;
            }
            let _ = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                client.execute("SELECT 1", &[]),
            )
            .await;
        }
    });
}

#[derive(Clone)]
pub struct PgStore {
    pub pool: Arc<PgPool>,
}

impl PgStore {
    pub async fn connect(
        pg_url: &str,
        schema: &Option<String>,
        pool_size: usize,
    ) -> Result<Self, PaymentError> {
        let pool = PgPool::connect_many(pg_url, schema, pool_size).await?;
        let store = Self {
            pool: Arc::new(pool),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PaymentError> {
        let client = self.pool.pick();
        client
            .batch_execute(
                r#"CREATE TABLE IF NOT EXISTS transactions (
                    id TEXT PRIMARY KEY,
                    merchant_transaction_id TEXT NOT NULL UNIQUE,
                    provider_transaction_id TEXT,
                    provider_session_id TEXT,
                    provider TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    amount DOUBLE PRECISION NOT NULL,
                    currency TEXT NOT NULL,
                    plan_name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    payment_method TEXT,
                    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_transactions_user
                    ON transactions (user_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_transactions_status
                    ON transactions (status, created_at);

                CREATE TABLE IF NOT EXISTS credits (
                    id TEXT PRIMARY KEY,
                    total_credit BIGINT NOT NULL DEFAULT 0,
                    used_credit BIGINT NOT NULL DEFAULT 0,
                    updated_at TIMESTAMPTZ NOT NULL
                );

                CREATE TABLE IF NOT EXISTS processed_events (
                    provider TEXT NOT NULL,
                    event_id TEXT NOT NULL,
                    merchant_transaction_id TEXT,
                    processed_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (provider, event_id)
                );

                CREATE TABLE IF NOT EXISTS rate_limits (
                    key TEXT PRIMARY KEY,
                    window_start BIGINT NOT NULL,
                    count BIGINT NOT NULL
                );"#,
            )
            .await
            .map_err(|e| PaymentError::Config(format!("Failed to init schema: {}", e)))?;
        tracing::info!("Postgres schema ready");
        Ok(())
    }
}
