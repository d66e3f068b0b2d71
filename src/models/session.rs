use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttentivenessState, Frame};

/// One classified sample inside an active session.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub status: AttentivenessState,
    /// Only retained for `Focused` samples; used for highlight selection.
    pub sample: Option<Frame>,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, status: AttentivenessState, frame: Frame) -> Self {
        let sample = (status == AttentivenessState::Focused).then_some(frame);
        Self {
            timestamp,
            status,
            sample,
        }
    }
}

/// Aggregated result of one completed session, as stored in history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session start as epoch milliseconds.
    pub id: i64,
    pub date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub focus_percentage: f64,
    pub summary: String,
    pub tip: String,
    #[serde(default)]
    pub highlight_frames: Vec<Frame>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_focused_entries_keep_their_frame() {
        let now = Utc::now();
        let frame = Frame::jpeg(vec![1, 2, 3]);

        let focused = LogEntry::new(now, AttentivenessState::Focused, frame.clone());
        assert_eq!(focused.sample, Some(frame.clone()));

        let away = LogEntry::new(now, AttentivenessState::Away, frame);
        assert!(away.sample.is_none());
    }
}
