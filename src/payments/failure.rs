//! Failure codes shown on the client-facing failure page.

use crate::transactions::TransactionStatus;

pub const PAYMENT_ERROR: &str = "PAYMENT_ERROR";
pub const PAYMENT_CANCELLED: &str = "PAYMENT_CANCELLED";
pub const TIMED_OUT: &str = "TIMED_OUT";
pub const TRANSACTION_NOT_FOUND: &str = "TRANSACTION_NOT_FOUND";
pub const PAYMENT_PENDING: &str = "PAYMENT_PENDING";
pub const MISSING_TRANSACTION_ID: &str = "MISSING_TRANSACTION_ID";

const DEFAULT_REASON: &str = "Your payment could not be completed.";

const REASONS: &[(&str, &str)] = &[
    (PAYMENT_ERROR, "There was an error processing your payment."),
    ("PAYMENT_DECLINED", "Your payment was declined by the bank."),
    (PAYMENT_CANCELLED, "The payment was cancelled."),
    (TIMED_OUT, "The payment session timed out."),
    ("AUTHORIZATION_FAILED", "Payment authorization failed."),
    (TRANSACTION_NOT_FOUND, "We could not find this transaction."),
    (
        PAYMENT_PENDING,
        "Your payment is still being processed. Please check back in a few minutes.",
    ),
    ("INSUFFICIENT_FUNDS", "Your account has insufficient funds."),
    (MISSING_TRANSACTION_ID, "No transaction reference was provided."),
];

/// Friendly text for a failure code; unknown codes get a generic reason.
pub fn reason_for(code: &str) -> &'static str {
    let code = code.trim();
    REASONS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, reason)| *reason)
        .unwrap_or(DEFAULT_REASON)
}

/// Code used when the provider gave none.
pub fn code_for_status(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Pending => PAYMENT_PENDING,
        TransactionStatus::Cancelled => PAYMENT_CANCELLED,
        TransactionStatus::Expired => TIMED_OUT,
        TransactionStatus::Failed | TransactionStatus::Success => PAYMENT_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_specific_reasons() {
        assert_eq!(reason_for("PAYMENT_DECLINED"), "Your payment was declined by the bank.");
        assert_eq!(reason_for("timed_out"), "The payment session timed out.");
        assert!(reason_for(PAYMENT_PENDING).contains("still being processed"));
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(reason_for("SOMETHING_ELSE"), DEFAULT_REASON);
        assert_eq!(reason_for(""), DEFAULT_REASON);
    }

    #[test]
    fn statuses_map_to_codes() {
        assert_eq!(code_for_status(TransactionStatus::Expired), TIMED_OUT);
        assert_eq!(code_for_status(TransactionStatus::Cancelled), PAYMENT_CANCELLED);
        assert_eq!(code_for_status(TransactionStatus::Failed), PAYMENT_ERROR);
    }
}
