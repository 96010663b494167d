//! Speech-to-Text Transcriber

use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs},
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

/// An uploaded audio recording. The file name carries the container format
/// (`.wav`, `.webm`, ...), which speech services use to pick a decoder.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub file_name: String,
    pub bytes: Bytes,
}

impl AudioClip {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The result of transcribing one clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn model(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<Transcription>;
}

/// A `Transcriber` that calls an OpenAI-compatible transcription endpoint.
pub struct OpenAITranscriber {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAITranscriber {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    fn model(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<Transcription> {
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(clip.file_name, clip.bytes.to_vec()))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson)
            .build()?;

        let response = self.client.audio().transcribe_verbose_json(request).await?;
        let language = if response.language.is_empty() {
            "unknown".to_string()
        } else {
            response.language
        };
        Ok(Transcription {
            text: response.text.trim().to_string(),
            language,
        })
    }
}
