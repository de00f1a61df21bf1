pub mod config;
pub mod credits;
pub mod error;
pub mod http_client;
pub mod payments;
pub mod plans;
pub mod providers;
pub mod rate_limit;
pub mod server;
pub mod storage;
pub mod transactions;
pub mod webhook_events;
