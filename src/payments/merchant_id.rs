use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

/// `TXN_<first 8 alphanumerics of the user id>_<unix millis>_<6 random>`,
/// uppercased. Users with no alphanumerics in their id get `ANON`.
pub fn generate(user_id: &str, now: DateTime<Utc>) -> String {
    let prefix: String = user_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    let prefix = if prefix.is_empty() {
        "ANON".to_string()
    } else {
        prefix
    };
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("TXN_{}_{}_{}", prefix, now.timestamp_millis(), suffix).to_uppercase()
}
