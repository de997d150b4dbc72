use chrono::{DateTime, Local, TimeZone, Utc};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch millis for `hours` before now.
pub fn millis_ago(hours: u32) -> i64 {
    now_millis() - i64::from(hours) * 60 * 60 * 1000
}

/// Render an epoch-millis timestamp in local time for display.
pub fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(utc) => DateTime::<Local>::from(utc)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        None => format!("{millis}ms"),
    }
}
