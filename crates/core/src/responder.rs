//! Vision-Language Responder
//!
//! The `Responder` answers a prompt about an image, either in one shot or as a
//! lazy stream of text fragments. Sessions share one responder instance, so
//! implementations must tolerate concurrent calls.

use crate::image::ImageFrame;
use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A finite, non-restartable stream of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Sampling parameters for a single generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationOptions {
    /// Budget for interactive queries where the user waits for a full answer.
    pub const fn full() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
        }
    }

    /// Short, near-deterministic budget for periodic scene summaries.
    pub const fn monitoring() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.1,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::full()
    }
}

/// Contract for any vision-language backend.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Identifier of the underlying model, reported by the health endpoint.
    fn model(&self) -> &str;

    /// Whether `generate_stream` yields real incremental output. Decided when
    /// the responder is constructed, never probed at call time.
    fn supports_streaming(&self) -> bool;

    fn is_ready(&self) -> bool {
        true
    }

    /// Produces a complete answer for `prompt` about `image`.
    async fn generate(
        &self,
        image: &ImageFrame,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String>;

    /// Produces the answer as a stream of fragments in generation order.
    async fn generate_stream(&self, image: &ImageFrame, prompt: &str) -> Result<TokenStream>;
}

/// Splits a finished answer into word fragments for backends that cannot
/// stream. Every fragment except the last keeps its trailing space, so the
/// fragments concatenate back to the original text.
pub fn word_chunks(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split(' ').collect();
    let last = words.len().saturating_sub(1);
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| {
            if i < last {
                format!("{word} ")
            } else {
                word.to_string()
            }
        })
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// A `Responder` backed by any OpenAI-compatible chat completions API with
/// image input, such as a hosted vision model or a local LLaVA server.
pub struct OpenAICompatibleResponder {
    client: Client<OpenAIConfig>,
    model: String,
    streaming: bool,
}

impl OpenAICompatibleResponder {
    /// Creates a new responder.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the service.
    /// * `model` - Vision-capable model identifier (e.g., "gpt-4o-mini").
    /// * `streaming` - Whether the service supports streamed completions.
    pub fn new(config: OpenAIConfig, model: String, streaming: bool) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            streaming,
        }
    }

    fn build_request(
        &self,
        image: &ImageFrame,
        prompt: &str,
        options: GenerationOptions,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest> {
        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt)
                    .build()?
                    .into(),
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image.to_data_url())
                            .detail(ImageDetail::Low)
                            .build()?,
                    )
                    .build()?
                    .into(),
            ])
            .build()?
            .into();

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![message])
            .max_completion_tokens(options.max_tokens)
            .temperature(options.temperature)
            .stream(stream)
            .build()?)
    }
}

#[async_trait]
impl Responder for OpenAICompatibleResponder {
    fn model(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate(
        &self,
        image: &ImageFrame,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String> {
        let request = self.build_request(image, prompt, options, false)?;
        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| anyhow!("Responder returned no text content."))
    }

    async fn generate_stream(&self, image: &ImageFrame, prompt: &str) -> Result<TokenStream> {
        let request = self.build_request(image, prompt, GenerationOptions::full(), true)?;
        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(e.into())),
            }
        })))
    }
}
