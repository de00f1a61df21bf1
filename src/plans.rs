//! Fixed plan-name to credit-grant table.

/// Plans sold through checkout and the credits each one grants.
pub const PLAN_CREDITS: &[(&str, i64)] = &[
    ("Starter Plan", 1),
    ("Weekly Plan", 50),
    ("Monthly Plan", 200),
];

/// Credits granted for `plan_name`. Unknown plans grant nothing.
pub fn credit_grant(plan_name: &str) -> i64 {
    let name = plan_name.trim();
    PLAN_CREDITS
        .iter()
        .find(|(plan, _)| *plan == name)
        .map(|(_, credits)| *credits)
        .unwrap_or(0)
}

pub fn is_known_plan(plan_name: &str) -> bool {
    let name = plan_name.trim();
    PLAN_CREDITS.iter().any(|(plan, _)| *plan == name)
}
