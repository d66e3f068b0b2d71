use std::sync::Arc;

use crate::error::InferenceError;
use crate::models::{AttentivenessState, Frame};

use super::PostureModel;

/// Maps a free-form classifier answer onto an attentiveness state.
///
/// Matching is by substring in a fixed order, so "FOCUSED." or "focused" both
/// count. Anything unrecognized maps to `Analyzing`: no classification made.
pub fn parse_attentiveness(text: &str) -> AttentivenessState {
    let normalized = text.trim().to_uppercase();

    if normalized.contains("FOCUSED") {
        AttentivenessState::Focused
    } else if normalized.contains("DISTRACTED") {
        AttentivenessState::Distracted
    } else if normalized.contains("AWAY") {
        AttentivenessState::Away
    } else {
        AttentivenessState::Analyzing
    }
}

#[derive(Clone)]
pub struct ClassifierAdapter {
    model: Arc<dyn PostureModel>,
}

impl ClassifierAdapter {
    pub fn new(model: Arc<dyn PostureModel>) -> Self {
        Self { model }
    }

    pub async fn classify(&self, frame: &Frame) -> Result<AttentivenessState, InferenceError> {
        let answer = self.model.describe_posture(frame).await?;
        let state = parse_attentiveness(&answer);
        if state == AttentivenessState::Analyzing {
            log::debug!("Unrecognized posture answer {answer:?}; keeping Analyzing");
        }
        Ok(state)
    }
}
