pub mod time;

pub use time::{format_local, whole_days_between};
