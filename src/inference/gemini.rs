//! HTTP client for the Gemini `generateContent` API.
//!
//! One client serves all three collaborator roles: posture classification,
//! speech synthesis and session summarization.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use reqwest::Client;
use serde_json::json;

use crate::error::InferenceError;
use crate::models::{AudioClip, Frame};
use crate::settings::CoachSettings;

use super::types::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part};
use super::{PostureModel, SessionFacts, SessionSummarizer, SpeechSynthesizer};

const POSTURE_PROMPT: &str = "Analyze this image of a person at their desk. Are they focused on \
their work, distracted, or away from the desk? Your answer must be a single word from this list: \
FOCUSED, DISTRACTED, AWAY.";

pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    posture_model: String,
    speech_model: String,
    summary_model: String,
    voice_name: String,
}

impl GeminiClient {
    pub fn new(settings: &CoachSettings, api_key: Option<String>) -> Result<Self, InferenceError> {
        let api_key = api_key.ok_or(InferenceError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            posture_model: settings.posture_model.clone(),
            speech_model: settings.speech_model.clone(),
            summary_model: settings.summary_model.clone(),
            voice_name: settings.voice_name.clone(),
        })
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, InferenceError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("POST {url}");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|err| InferenceError::malformed(err.to_string()))
    }
}

#[async_trait]
impl PostureModel for GeminiClient {
    async fn describe_posture(&self, frame: &Frame) -> Result<String, InferenceError> {
        let request = posture_request(frame);
        let response = self.generate(&self.posture_model, &request).await?;
        Ok(response.text().unwrap_or_default())
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, InferenceError> {
        let request = speech_request(text, &self.voice_name);
        let response = self.generate(&self.speech_model, &request).await?;

        let inline = response
            .inline_data()
            .ok_or_else(|| InferenceError::malformed("no audio data received from TTS API"))?;
        let bytes = BASE64
            .decode(inline.data.as_bytes())
            .map_err(|err| InferenceError::malformed(format!("audio payload is not base64: {err}")))?;
        let clip = AudioClip::new(bytes);
        Ok(if inline.mime_type.is_empty() {
            clip
        } else {
            clip.with_mime_type(inline.mime_type.clone())
        })
    }
}

#[async_trait]
impl SessionSummarizer for GeminiClient {
    async fn summarize(&self, facts: &SessionFacts) -> Result<String, InferenceError> {
        let request = summary_request(facts);
        let response = self.generate(&self.summary_model, &request).await?;
        response
            .text()
            .ok_or_else(|| InferenceError::malformed("summary response had no text"))
    }
}

fn posture_request(frame: &Frame) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![
                Part::inline(frame.mime_type.clone(), frame.to_base64()),
                Part::text(POSTURE_PROMPT),
            ],
        }],
        generation_config: None,
    }
}

fn speech_request(text: &str, voice_name: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part::text(format!(
                "Say with a calm, encouraging tone: {text}"
            ))],
        }],
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".into()]),
            speech_config: Some(json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice_name } }
            })),
            ..GenerationConfig::default()
        }),
    }
}

fn summary_request(facts: &SessionFacts) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part::text(summary_prompt(facts))],
        }],
        generation_config: Some(GenerationConfig {
            response_mime_type: Some("application/json".into()),
            response_schema: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "summary": { "type": "STRING" },
                    "tip": { "type": "STRING" }
                },
                "required": ["summary", "tip"]
            })),
            ..GenerationConfig::default()
        }),
    }
}

pub fn summary_prompt(facts: &SessionFacts) -> String {
    let distractions = if facts.distraction_times.is_empty() {
        "none".to_string()
    } else {
        facts.distraction_times.join(", ")
    };

    format!(
        "A user just finished a focus session of about {minutes} minutes.\n\
         Their focus level was 'FOCUSED' for {focus:.0}% of the time.\n\
         They were distracted or away at these times: {distractions}.\n\
         \n\
         Analyze this session data and provide a response in JSON format.\n\
         The JSON object should have two keys:\n\
         1. \"summary\": A brief, encouraging, and friendly summary (2-3 sentences) of their session. Acknowledge their effort.\n\
         2. \"tip\": One actionable, concrete tip for improvement for their next session based on when they got distracted.",
        minutes = facts.duration_minutes,
        focus = facts.focus_percentage,
    )
}
