use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};

use crate::error::InferenceError;
use crate::inference::{SessionFacts, SessionSummarizer};
use crate::models::{AttentivenessState, Frame, LogEntry};
use crate::utils::time::clock_time;

// Set to false to silence aggregation logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub const MAX_HIGHLIGHTS: usize = 5;
const MIN_FOCUSED_SAMPLES: usize = 2;

const LOW_DATA_SUMMARY: &str = "You just completed a session! Every effort counts. Let's try to build more focus in the next one.";
const LOW_DATA_TIP: &str = "For the next session, try setting a clear, single goal before you start. It can make a huge difference!";
const FALLBACK_SUMMARY: &str = "Great session! You showed some real dedication. Keep up the momentum!";
const FALLBACK_TIP: &str = "Consistency is key. Try to schedule your next focus session for the same time tomorrow.";
const PARTIAL_SUMMARY: &str = "Great session! You showed some real dedication.";
const PARTIAL_TIP: &str = "Keep up the great work in your next session!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInsights {
    pub summary: String,
    pub tip: String,
}

impl SessionInsights {
    fn new(summary: &str, tip: &str) -> Self {
        Self {
            summary: summary.to_string(),
            tip: tip.to_string(),
        }
    }

    pub fn low_data() -> Self {
        Self::new(LOW_DATA_SUMMARY, LOW_DATA_TIP)
    }

    pub fn fallback() -> Self {
        Self::new(FALLBACK_SUMMARY, FALLBACK_TIP)
    }
}

/// Everything the session record needs, computed from one session's log.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub duration_minutes: u32,
    pub focus_percentage: f64,
    pub insights: SessionInsights,
    pub highlight_frames: Vec<Frame>,
}

#[derive(Clone)]
pub struct Aggregator {
    summarizer: Arc<dyn SessionSummarizer>,
    summary_timeout: Duration,
}

impl Aggregator {
    pub fn new(summarizer: Arc<dyn SessionSummarizer>, summary_timeout: Duration) -> Self {
        Self {
            summarizer,
            summary_timeout,
        }
    }

    /// Degrades to fixed text whenever the summarizer cannot help; only the
    /// summary and tip are ever substituted, the numbers always come from the log.
    pub async fn aggregate(&self, log: &[LogEntry]) -> Aggregation {
        let facts = session_facts(log);
        let insights = if focused_count(log) < MIN_FOCUSED_SAMPLES {
            log_debug!(
                "Only {} focused sample(s) in {} entries; using low-data summary",
                focused_count(log),
                log.len()
            );
            SessionInsights::low_data()
        } else {
            self.request_insights(&facts).await
        };

        Aggregation {
            duration_minutes: facts.duration_minutes,
            focus_percentage: facts.focus_percentage,
            insights,
            highlight_frames: select_highlights(log),
        }
    }

    async fn request_insights(&self, facts: &SessionFacts) -> SessionInsights {
        let response =
            match tokio::time::timeout(self.summary_timeout, self.summarizer.summarize(facts)).await
            {
                Ok(Ok(raw)) => raw,
                Ok(Err(err)) => {
                    log_warn!("Session summarization failed: {err}");
                    return SessionInsights::fallback();
                }
                Err(_) => {
                    log_warn!(
                        "Session summarization timed out after {}s",
                        self.summary_timeout.as_secs()
                    );
                    return SessionInsights::fallback();
                }
            };

        parse_insights(&response).unwrap_or_else(|err| {
            log_warn!("{err}; using fallback summary");
            SessionInsights::fallback()
        })
    }
}

pub fn session_facts(log: &[LogEntry]) -> SessionFacts {
    SessionFacts {
        duration_minutes: duration_minutes(log),
        focus_percentage: focus_percentage(log),
        distraction_times: log
            .iter()
            .filter(|entry| entry.status.is_negative())
            .map(|entry| clock_time(&entry.timestamp))
            .collect(),
    }
}

fn focused_count(log: &[LogEntry]) -> usize {
    log.iter()
        .filter(|entry| entry.status == AttentivenessState::Focused)
        .count()
}

/// `100 * focused / total`, or 0 for an empty log.
pub fn focus_percentage(log: &[LogEntry]) -> f64 {
    if log.is_empty() {
        return 0.0;
    }
    100.0 * focused_count(log) as f64 / log.len() as f64
}

/// Span between the first and last sample, rounded to whole minutes.
pub fn duration_minutes(log: &[LogEntry]) -> u32 {
    match (log.first(), log.last()) {
        (Some(first), Some(last)) => {
            let millis = (last.timestamp - first.timestamp).num_milliseconds().max(0);
            (millis as f64 / 60_000.0).round() as u32
        }
        _ => 0,
    }
}

/// The last five focused samples that kept a frame, oldest first.
pub fn select_highlights(log: &[LogEntry]) -> Vec<Frame> {
    let mut frames: Vec<Frame> = log
        .iter()
        .rev()
        .filter(|entry| entry.status == AttentivenessState::Focused)
        .filter_map(|entry| entry.sample.clone())
        .take(MAX_HIGHLIGHTS)
        .collect();
    frames.reverse();
    frames
}

/// Validates a summarizer response.
///
/// The body must be a JSON object (optionally inside a Markdown code fence)
/// with at least one non-empty string among `summary` and `tip`; a single
/// missing field is filled with a generic line.
pub fn parse_insights(raw: &str) -> Result<SessionInsights, InferenceError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|err| InferenceError::malformed(format!("summary is not JSON: {err}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| InferenceError::malformed("summary is not a JSON object"))?;

    match (text_field(object, "summary"), text_field(object, "tip")) {
        (Some(summary), Some(tip)) => Ok(SessionInsights { summary, tip }),
        (None, None) => Err(InferenceError::malformed(
            "summary response has neither `summary` nor `tip`",
        )),
        (summary, tip) => {
            log_debug!("Summary response missing a field; filling it in");
            Ok(SessionInsights {
                summary: summary.unwrap_or_else(|| PARTIAL_SUMMARY.to_string()),
                tip: tip.unwrap_or_else(|| PARTIAL_TIP.to_string()),
            })
        }
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
