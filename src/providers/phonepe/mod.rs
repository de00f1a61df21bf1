//! PhonePe Standard Checkout (v2): OAuth token, pay, order status and
//! server-to-server callbacks.

pub mod callback;
pub mod client;
pub mod types;

pub use callback::{CallbackAuth, PhonePeCallback, parse_callback};
pub use client::{PhonePeClient, PhonePeCredentials};
pub use types::state_outcome;
