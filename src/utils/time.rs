use chrono::{DateTime, Local, Utc};

/// Local wall-clock rendering used in status output.
pub fn format_local(time: DateTime<Utc>) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Whole days from `earlier` to `later`; negative when the clocks disagree.
pub fn whole_days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_days()
}
