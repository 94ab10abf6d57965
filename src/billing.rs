// src/billing.rs

use chrono::{DateTime, Duration, Utc};

pub const STANDARD_VALIDITY_DAYS: i64 = 365;
pub const FREE_VALIDITY_DAYS: i64 = 14;

/// Validity window for a purchased plan, computed server-side at transaction
/// creation. Client-supplied dates never determine billing validity.
pub fn validity_window(plan: &str, valid_from: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days = match plan.to_lowercase().as_str() {
        "standard" | "custom" => STANDARD_VALIDITY_DAYS,
        "free" => FREE_VALIDITY_DAYS,
        other => {
            // Undocumented business policy carried over as-is; confirm with
            // the domain owner before adding plan types.
            log::warn!("unknown plan type: {other}, defaulting to 1 year validity");
            STANDARD_VALIDITY_DAYS
        }
    };

    (valid_from, valid_from + Duration::days(days))
}
