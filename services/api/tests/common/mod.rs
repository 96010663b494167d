//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use futures::stream;
use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};
use worldsense_api::{
    config::{DEFAULT_MAX_UPLOAD_MB, SessionSettings},
    router::create_router,
    state::AppState,
    ws::registry::SessionRegistry,
};
use worldsense_core::{
    AudioClip, GenerationOptions, ImageFrame, Responder, Synthesizer, TokenStream, Transcriber,
    Transcription, VoiceInfo,
};

pub const AUDIO_URL: &str = "/static/audio/jarvis_scripted.mp3";
pub const MAX_UPLOAD_BYTES: usize = DEFAULT_MAX_UPLOAD_MB * 1024 * 1024;

/// Answers every request with the same tokens.
pub struct ScriptedResponder {
    tokens: Vec<String>,
}

impl ScriptedResponder {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn model(&self) -> &str {
        "scripted-vision"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        _image: &ImageFrame,
        _prompt: &str,
        _options: GenerationOptions,
    ) -> Result<String> {
        Ok(self.tokens.concat())
    }

    async fn generate_stream(&self, _image: &ImageFrame, _prompt: &str) -> Result<TokenStream> {
        Ok(Box::pin(stream::iter(
            self.tokens.clone().into_iter().map(Ok),
        )))
    }
}

pub struct FixedSynthesizer;

#[async_trait]
impl Synthesizer for FixedSynthesizer {
    fn backend(&self) -> &str {
        "fixed"
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        vec![VoiceInfo {
            name: "alloy".to_string(),
            language: "en".to_string(),
            gender: "neutral".to_string(),
        }]
    }

    async fn synthesize(&self, _text: &str) -> Result<Option<String>> {
        Ok(Some(AUDIO_URL.to_string()))
    }
}

pub struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    fn model(&self) -> &str {
        "echo"
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<Transcription> {
        Ok(Transcription {
            text: format!("heard {} bytes in {}", clip.bytes.len(), clip.file_name),
            language: "en".to_string(),
        })
    }
}

/// Settings that keep real-time tests short.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        monitor_interval: Duration::from_millis(50),
        chunk_pacing: Duration::ZERO,
        ..SessionSettings::default()
    }
}

pub fn app_state(tokens: &[&str]) -> Arc<AppState> {
    Arc::new(AppState {
        registry: Arc::new(SessionRegistry::new()),
        responder: Arc::new(ScriptedResponder::new(tokens)),
        transcriber: Arc::new(EchoTranscriber),
        synthesizer: Arc::new(FixedSynthesizer),
        settings: Arc::new(fast_settings()),
    })
}

/// Serves the full router on an ephemeral local port.
pub async fn spawn_server(state: Arc<AppState>, audio_dir: &Path) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state, audio_dir, MAX_UPLOAD_BYTES);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn png_data_url() -> String {
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition did not hold in time");
}
