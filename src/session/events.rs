use serde::Serialize;

use crate::models::{AttentivenessState, SessionRecord};

use super::SessionPhase;

/// Notifications for the display layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        phase: SessionPhase,
        status: AttentivenessState,
    },
    #[serde(rename_all = "camelCase")]
    Tick { elapsed_secs: u64 },
    SessionFailed { message: String },
    SessionCompleted { record: SessionRecord },
}
