use chrono::{DateTime, Local, Utc};

/// `MM:SS` rendering of the elapsed counter; minutes keep growing past 59.
pub fn format_elapsed(elapsed_secs: u64) -> String {
    format!("{:02}:{:02}", elapsed_secs / 60, elapsed_secs % 60)
}

/// Local wall-clock time of a sample, as quoted to the summarizer.
pub fn clock_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}
