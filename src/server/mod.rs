pub mod credit_cache;
pub mod handlers;
pub(crate) mod rate_limit;
pub(crate) mod util;

use axum::Router;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::payments::PaymentService;
use crate::payments::reconcile::spawn_reconciler;
use crate::rate_limit::RateLimitStore;
use crate::storage;

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub payments: Arc<PaymentService>,
    pub rate_limits: Arc<dyn RateLimitStore>,
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    // Postgres when configured, SQLite otherwise
    let stores = storage::connect(&config.storage).await?;
    let payments = Arc::new(PaymentService::from_settings(&config, stores.clone())?);

    spawn_reconciler(payments.clone(), &config.payments);
    tracing::info!(
        "Reconciling PENDING payments older than {} minutes every {}s",
        config.payments.pending_expiry_minutes,
        config.payments.reconcile_interval_secs
    );

    let app_state = AppState {
        config,
        payments,
        rate_limits: stores.rate_limits.clone(),
    };
    Ok(build_router(Arc::new(app_state)))
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let mut app = handlers::routes(app_state.clone()).with_state(app_state);

    // CORS for the pricing page; webhooks and callbacks are server-to-server
    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);
    app = app
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    app
}
