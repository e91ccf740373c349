use chrono::{DateTime, Utc};

/// Human-readable age of a timestamp ("just now", "5m ago", "2h ago", "3d ago").
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        // Covers clock skew too
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins >= 30 {
            // Round up: 1h 30m+ becomes 2h
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        let remaining_hours = (minutes % 1440) / 60;
        if remaining_hours >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// Age of an optional timestamp, "never" when absent.
pub fn format_last_sync(then: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    then.map(|t| format_age(t, now))
        .unwrap_or_else(|| "never".to_string())
}
