//! Scripted collaborators for unit tests.

use crate::{config::SessionSettings, state::AppState, ws::registry::SessionRegistry};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use worldsense_core::{
    AudioClip, GenerationOptions, ImageFrame, Responder, Synthesizer, TokenStream, Transcriber,
    Transcription, VoiceInfo,
};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub fn png_frame() -> ImageFrame {
    ImageFrame::from_bytes(PNG_SIGNATURE.to_vec()).expect("valid png signature")
}

pub fn png_base64() -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(PNG_SIGNATURE)
    )
}

/// A responder that answers from a script.
pub struct FakeResponder {
    answer: Result<String, String>,
    tokens: Vec<Result<String, String>>,
    streaming: bool,
    delay: Duration,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    last_options: Mutex<Option<GenerationOptions>>,
}

impl FakeResponder {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            tokens: Vec::new(),
            streaming: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            last_options: Mutex::new(None),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            answer: Err(error.to_string()),
            ..Self::answering("")
        }
    }

    /// Streams the given tokens from `generate_stream`.
    pub fn streaming(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| Ok(t.to_string())).collect(),
            ..Self::answering(&tokens.concat())
        }
    }

    /// Streams `tokens`, then fails with `error`.
    pub fn streaming_then_failing(tokens: &[&str], error: &str) -> Self {
        let mut scripted: Vec<Result<String, String>> =
            tokens.iter().map(|t| Ok(t.to_string())).collect();
        scripted.push(Err(error.to_string()));
        Self {
            tokens: scripted,
            ..Self::answering("")
        }
    }

    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }

    pub fn last_options(&self) -> Option<GenerationOptions> {
        *self.last_options.lock()
    }

    fn record(&self, prompt: &str, options: Option<GenerationOptions>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock() = Some(prompt.to_string());
        if options.is_some() {
            *self.last_options.lock() = options;
        }
    }
}

#[async_trait]
impl Responder for FakeResponder {
    fn model(&self) -> &str {
        "fake-vision"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate(
        &self,
        _image: &ImageFrame,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String> {
        self.record(prompt, Some(options));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.clone().map_err(|e| anyhow!(e))
    }

    async fn generate_stream(&self, _image: &ImageFrame, prompt: &str) -> Result<TokenStream> {
        self.record(prompt, None);
        let tokens: Vec<Result<String>> = self
            .tokens
            .iter()
            .cloned()
            .map(|t| t.map_err(|e| anyhow!(e)))
            .collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

/// A synthesizer that returns a fixed reference, or fails.
pub struct FakeSynthesizer {
    result: Result<Option<String>, String>,
    pub spoken: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn returning(url: Option<&str>) -> Self {
        Self {
            result: Ok(url.map(str::to_string)),
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            result: Err(error.to_string()),
            spoken: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    fn backend(&self) -> &str {
        "fake-tts"
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        vec![VoiceInfo {
            name: "fake".to_string(),
            language: "en".to_string(),
            gender: "neutral".to_string(),
        }]
    }

    async fn synthesize(&self, text: &str) -> Result<Option<String>> {
        self.spoken.lock().push(text.to_string());
        self.result.clone().map_err(|e| anyhow!(e))
    }
}

pub struct FakeTranscriber;

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn model(&self) -> &str {
        "fake-stt"
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<Transcription> {
        Ok(Transcription {
            text: format!("{} bytes from {}", clip.bytes.len(), clip.file_name),
            language: "en".to_string(),
        })
    }
}

pub fn test_state_with(
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
    settings: SessionSettings,
) -> Arc<AppState> {
    Arc::new(AppState {
        registry: Arc::new(SessionRegistry::new()),
        responder,
        transcriber: Arc::new(FakeTranscriber),
        synthesizer,
        settings: Arc::new(settings),
    })
}

pub fn test_state(responder: Arc<dyn Responder>, settings: SessionSettings) -> Arc<AppState> {
    test_state_with(
        responder,
        Arc::new(FakeSynthesizer::returning(Some("/static/audio/test.mp3"))),
        settings,
    )
}
