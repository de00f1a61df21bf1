pub mod postgres;
mod postgres_credits;
mod postgres_events;
mod postgres_transactions;
pub mod sqlite;
mod sqlite_credits;
mod sqlite_events;
mod sqlite_transactions;
pub mod time;

use std::sync::Arc;

use crate::config::settings::StorageConfig;
use crate::credits::CreditStore;
use crate::error::PaymentError;
use crate::rate_limit::RateLimitStore;
use crate::transactions::TransactionStore;
use crate::webhook_events::EventStore;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// The four persistence concerns, backed by one database.
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionStore>,
    pub credits: Arc<dyn CreditStore>,
    pub events: Arc<dyn EventStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
}

impl Stores {
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: TransactionStore + CreditStore + EventStore + RateLimitStore + 'static,
    {
        Self {
            transactions: store.clone(),
            credits: store.clone(),
            events: store.clone(),
            rate_limits: store,
        }
    }
}

/// Postgres when `pg_url` is configured, SQLite otherwise.
pub async fn connect(config: &StorageConfig) -> Result<Stores, PaymentError> {
    if let Some(pg_url) = &config.pg_url {
        let pool_size = config.pg_pool_size.unwrap_or(4);
        let store = PgStore::connect(pg_url, &config.pg_schema, pool_size).await?;
        tracing::info!("Using PostgreSQL for transactions and credits");
        Ok(Stores::from_backend(Arc::new(store)))
    } else {
        let store = SqliteStore::open(&config.database_path).await?;
        tracing::info!("Using SQLite at {}", config.database_path);
        Ok(Stores::from_backend(Arc::new(store)))
    }
}
