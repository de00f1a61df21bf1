use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use crate::error::PaymentError;
use crate::rate_limit::window_start;
use crate::server::AppState;
use crate::server::util::client_identity;

/// Fixed-window limit per client identity, counted in the shared store so
/// every instance sees the same totals.
pub async fn enforce(
    State(app_state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, PaymentError> {
    let config = &app_state.config.rate_limit;
    if !config.enabled {
        return Ok(next.run(request).await);
    }

    let identity = client_identity(request.headers());
    let window = window_start(Utc::now(), config.window_secs);
    match app_state.rate_limits.hit(&identity, window).await {
        Ok(count) if count > config.max_requests => {
            tracing::warn!(
                "Rate limit exceeded for {} on {} ({} requests)",
                identity,
                request.uri().path(),
                count
            );
            return Err(PaymentError::RateLimited);
        }
        Ok(_) => {}
        // a counter outage must not block payments
        Err(e) => tracing::error!("Rate limit store error, allowing request: {}", e),
    }
    Ok(next.run(request).await)
}
