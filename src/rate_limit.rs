use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PaymentError;

/// Shared fixed-window counters keyed by client identity.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts one request for `key` in the window starting at `window_start`
    /// and returns the number of requests seen in that window so far. A new
    /// window resets the counter.
    async fn hit(&self, key: &str, window_start: i64) -> Result<i64, PaymentError>;
}

/// Start (unix seconds) of the fixed window containing `now`.
pub fn window_start(now: DateTime<Utc>, window_secs: i64) -> i64 {
    let window = window_secs.max(1);
    let ts = now.timestamp();
    ts - ts.rem_euclid(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn windows_align_to_multiples() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 59).unwrap();
        let start = window_start(t, 60);
        assert_eq!(start % 60, 0);
        assert_eq!(t.timestamp() - start, 59);
        let next = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(window_start(next, 60), start + 60);
        assert_eq!(window_start(t, 0), t.timestamp());
    }
}
