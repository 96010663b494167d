//! API Models
//!
//! This module defines the request and response bodies of the REST API and
//! generates their OpenAPI schemas with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use worldsense_core::VoiceInfo;

/// Question used when a `/api/llava/query` request carries none.
pub const DEFAULT_HTTP_QUESTION: &str = "What do you see in this image?";

fn default_question() -> String {
    DEFAULT_HTTP_QUESTION.to_string()
}

#[derive(Deserialize, ToSchema)]
pub struct QueryPayload {
    /// Base64 image, optionally as a `data:` URL.
    #[schema(example = "data:image/jpeg;base64,/9j/4AAQSkZJRg...")]
    pub image: String,
    #[serde(default = "default_question")]
    #[schema(example = "What do you see?")]
    pub question: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct QueryResponse {
    pub success: bool,
    pub response: String,
    pub question: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TranscriptionResponse {
    pub success: bool,
    pub text: String,
    #[schema(example = "en")]
    pub language: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ResponderHealth {
    pub model: String,
    pub ready: bool,
    pub streaming: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TranscriberHealth {
    pub model: String,
    pub ready: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SynthesizerHealth {
    pub backend: String,
    pub ready: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub responder: ResponderHealth,
    pub transcriber: TranscriberHealth,
    pub synthesizer: SynthesizerHealth,
    pub active_connections: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Voice {
    #[schema(example = "alloy")]
    pub name: String,
    pub language: String,
    pub gender: String,
}

impl From<VoiceInfo> for Voice {
    fn from(info: VoiceInfo) -> Self {
        Self {
            name: info.name,
            language: info.language,
            gender: info.gender,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct VoicesResponse {
    pub voices: Vec<Voice>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
