use thiserror::Error;

/// Errors surfaced to whoever drives a session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("a focus session is already active")]
    AlreadyActive,

    /// The classifier failed mid-session; the session was abandoned.
    #[error("Focus analysis failed. Check your network or API key. ({0})")]
    AnalysisFailed(String),

    #[error("Unable to generate your session summary. ({0})")]
    AggregationFailed(String),
}

/// Errors from the external inference collaborators.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("no API key configured (set FOCUSCOACH_API_KEY or GEMINI_API_KEY)")]
    MissingApiKey,
}

impl InferenceError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        InferenceError::MalformedResponse(detail.into())
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to decode audio clip: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    Output(String),
}
