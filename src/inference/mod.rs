//! Contracts for the external inference service.
//!
//! The engine only ever talks to these traits. `gemini` provides the HTTP
//! implementation; tests provide scripted fakes.

mod classifier;
pub mod gemini;
mod types;

pub use classifier::{parse_attentiveness, ClassifierAdapter};
pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::InferenceError;
use crate::models::{AudioClip, Frame};

/// Returns the model's free-form judgement of a frame. Mapping the text onto
/// an attentiveness state is the adapter's job.
#[async_trait]
pub trait PostureModel: Send + Sync {
    async fn describe_posture(&self, frame: &Frame) -> Result<String, InferenceError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, InferenceError>;
}

/// Returns the raw response text, expected to be a JSON object with
/// `summary` and `tip` strings. Validation happens in the aggregator.
#[async_trait]
pub trait SessionSummarizer: Send + Sync {
    async fn summarize(&self, facts: &SessionFacts) -> Result<String, InferenceError>;
}

/// What the summarizer is told about a finished session.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionFacts {
    pub duration_minutes: u32,
    pub focus_percentage: f64,
    /// Local clock times of every distracted or away sample.
    pub distraction_times: Vec<String>,
}
