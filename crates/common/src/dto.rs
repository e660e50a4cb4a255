use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use crate::error::{Error, Result};

// Constants for validation
const MIN_TOKENS: usize = 1;
const TEMPERATURE_MIN: f32 = 0.0;
const TEMPERATURE_MAX: f32 = 2.0;

/// Message role enum for strict validation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a wire role, case-insensitively. Unknown roles yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of a conversation log
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: SystemTime,
    pub actor_name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: SystemTime::now(),
            actor_name: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Categories of ML capability, each with independent idle eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendClass {
    TextGeneration,
    Transcription,
    Synthesis,
    ImageGeneration,
}

impl BackendClass {
    pub const ALL: [BackendClass; 4] = [
        BackendClass::TextGeneration,
        BackendClass::Transcription,
        BackendClass::Synthesis,
        BackendClass::ImageGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendClass::TextGeneration => "text_generation",
            BackendClass::Transcription => "transcription",
            BackendClass::Synthesis => "synthesis",
            BackendClass::ImageGeneration => "image_generation",
        }
    }
}

impl fmt::Display for BackendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to append a message to a pinned conversation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRequest {
    pub conversation_id: Option<String>,
    pub message: Option<String>,
}

/// Request to generate the next assistant turn of a pinned conversation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub conversation_id: Option<String>,
    pub message: Option<String>,
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub single_message_mode: bool,
    #[serde(default)]
    pub response_prefix: String,
}

/// Model pinned to a conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub path: String,
}

/// Incoming chat message. Both fields are optional on the wire; entries
/// without a known role or with blank content are skipped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl RequestMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_string()),
            content: content.into(),
        }
    }
}

/// Request for chat completion with validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<RequestMessage>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub stream: Option<bool>,
}

impl ChatCompletionRequest {
    /// Validate the request
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::InvalidRequest("Messages array cannot be empty".into()));
        }

        if let Some(temp) = self.temperature {
            if !(TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temp) {
                return Err(Error::InvalidRequest(format!(
                    "Temperature must be between {} and {}",
                    TEMPERATURE_MIN, TEMPERATURE_MAX
                )));
            }
        }

        if let Some(max_tokens) = self.max_tokens {
            if max_tokens < MIN_TOKENS {
                return Err(Error::InvalidRequest(format!(
                    "max_tokens must be at least {}",
                    MIN_TOKENS
                )));
            }
        }

        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// Message in a completion response
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub role: Role,
    pub content: String,
}

/// Response for chat completion
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

/// Choice in completion response
#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub message: ResponseMessage,
    pub finish_reason: Option<FinishReason>,
    pub index: usize,
}

/// Finish reason enum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
}

/// Approximate token usage, counted as whitespace-separated words
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn approximate<'a>(prompt: impl IntoIterator<Item = &'a str>, completion: &str) -> Self {
        let prompt_tokens = prompt
            .into_iter()
            .map(|text| text.split_whitespace().count())
            .sum();
        let completion_tokens = completion.split_whitespace().count();
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Streaming chunk for OpenAI compatibility
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

/// Streaming choice
#[derive(Debug, Clone, Serialize)]
pub struct StreamChoice {
    pub index: usize,
    pub delta: DeltaContent,
    pub finish_reason: Option<FinishReason>,
}

/// Delta content for streaming
#[derive(Debug, Clone, Serialize)]
pub struct DeltaContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Audio submitted for transcription
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    pub filename: String,
    pub audio: Vec<u8>,
    pub srt_mode: bool,
}

/// Text submitted for speech synthesis, optionally with a voice to clone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(skip)]
    pub voice_sample: Option<Vec<u8>>,
}

/// Image generation request
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub guidance_scale: Option<f32>,
    pub seed: Option<u64>,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub model_loaded: Option<String>,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health status enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
}

/// Generation parameters for a single engine call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: usize,
    /// Overrides the engine's configured sampling temperature
    pub temperature: Option<f32>,
    /// Text appended after the formatted prompt, priming the reply
    pub response_prefix: String,
}

impl GenerationParams {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            temperature: None,
            response_prefix: String::new(),
        }
    }

    pub fn with_response_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.response_prefix = prefix.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::new(200)
    }
}
