use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::PaymentError;

#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open(database_path: &str) -> Result<Self, PaymentError> {
        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        let conn = Connection::open(database_path)?;
        init_schema(&conn)?;
        tracing::info!("SQLite store initialized at: {}", database_path);

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;

         CREATE TABLE IF NOT EXISTS transactions (
             id TEXT PRIMARY KEY,
             merchant_transaction_id TEXT NOT NULL UNIQUE,
             provider_transaction_id TEXT,
             provider_session_id TEXT,
             provider TEXT NOT NULL,
             user_id TEXT NOT NULL,
             amount REAL NOT NULL,
             currency TEXT NOT NULL,
             plan_name TEXT NOT NULL,
             status TEXT NOT NULL,
             payment_method TEXT,
             metadata TEXT NOT NULL DEFAULT '{}',
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_transactions_user
             ON transactions (user_id, created_at);
         CREATE INDEX IF NOT EXISTS idx_transactions_status
             ON transactions (status, created_at);

         CREATE TABLE IF NOT EXISTS credits (
             id TEXT PRIMARY KEY,
             total_credit INTEGER NOT NULL DEFAULT 0,
             used_credit INTEGER NOT NULL DEFAULT 0,
             updated_at TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS processed_events (
             provider TEXT NOT NULL,
             event_id TEXT NOT NULL,
             merchant_transaction_id TEXT,
             processed_at TEXT NOT NULL,
             PRIMARY KEY (provider, event_id)
         );

         CREATE TABLE IF NOT EXISTS rate_limits (
             key TEXT PRIMARY KEY,
             window_start INTEGER NOT NULL,
             count INTEGER NOT NULL
         );",
    )
}
