//! Text-to-Speech Synthesizer
//!
//! Synthesized speech is written to an audio directory and handed back to the
//! client as a web path, so the browser can fetch and play it on its own.

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice},
};
use async_trait::async_trait;
use serde::Serialize;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, info};
use uuid::Uuid;

/// Prefix shared by every generated audio file, used when cleaning up.
const FILE_PREFIX: &str = "jarvis_";
const FILE_EXTENSION: &str = "mp3";

/// Web path under which the audio directory is served.
pub const AUDIO_URL_PREFIX: &str = "/static/audio";

/// A voice a synthesizer can speak with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub gender: String,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Name of the speech backend, reported by the health endpoint.
    fn backend(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<VoiceInfo>;

    /// Speaks `text` and returns a reference the client can fetch the audio
    /// from. Blank text yields `Ok(None)`.
    async fn synthesize(&self, text: &str) -> Result<Option<String>>;
}

/// A `Synthesizer` that calls an OpenAI-compatible speech endpoint and stores
/// the resulting mp3 files on disk.
pub struct SpeechFileSynthesizer {
    client: Client<OpenAIConfig>,
    model: String,
    voice: String,
    audio_dir: PathBuf,
}

impl SpeechFileSynthesizer {
    /// Creates the synthesizer and its audio directory.
    pub fn new(
        config: OpenAIConfig,
        model: String,
        voice: String,
        audio_dir: PathBuf,
    ) -> Result<Self> {
        std::fs::create_dir_all(&audio_dir).with_context(|| {
            format!("Failed to create audio directory {}", audio_dir.display())
        })?;
        Ok(Self {
            client: Client::with_config(config),
            model,
            voice,
            audio_dir,
        })
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Removes generated audio files whose last modification is at least
    /// `max_age`. Returns how many files were deleted.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.audio_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !is_generated_file(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Cleaned up old audio files.");
        }
        Ok(removed)
    }

    fn speech_model(&self) -> SpeechModel {
        match self.model.as_str() {
            "tts-1" => SpeechModel::Tts1,
            "tts-1-hd" => SpeechModel::Tts1Hd,
            other => SpeechModel::Other(other.to_string()),
        }
    }

    fn speech_voice(&self) -> Result<Voice> {
        match self.voice.to_lowercase().as_str() {
            "alloy" => Ok(Voice::Alloy),
            "echo" => Ok(Voice::Echo),
            "fable" => Ok(Voice::Fable),
            "onyx" => Ok(Voice::Onyx),
            "nova" => Ok(Voice::Nova),
            "shimmer" => Ok(Voice::Shimmer),
            other => Err(anyhow!("Unsupported speech voice '{other}'")),
        }
    }
}

/// Builds `jarvis_<hash8>_<rand6>.mp3`: the hash groups files by text, the
/// random suffix keeps concurrent syntheses of the same text apart.
fn audio_file_name(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let hash = format!("{:016x}", hasher.finish());
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{FILE_PREFIX}{}_{}.{FILE_EXTENSION}",
        &hash[..8],
        &suffix[..6]
    )
}

fn is_generated_file(name: &str) -> bool {
    name.starts_with(FILE_PREFIX) && name.ends_with(&format!(".{FILE_EXTENSION}"))
}

#[async_trait]
impl Synthesizer for SpeechFileSynthesizer {
    fn backend(&self) -> &str {
        &self.model
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        [
            ("alloy", "neutral"),
            ("echo", "male"),
            ("fable", "neutral"),
            ("onyx", "male"),
            ("nova", "female"),
            ("shimmer", "female"),
        ]
        .into_iter()
        .map(|(name, gender)| VoiceInfo {
            name: name.to_string(),
            language: "en".to_string(),
            gender: gender.to_string(),
        })
        .collect()
    }

    async fn synthesize(&self, text: &str) -> Result<Option<String>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .model(self.speech_model())
            .voice(self.speech_voice()?)
            .response_format(SpeechResponseFormat::Mp3)
            .build()?;
        let response = self.client.audio().speech(request).await?;

        let file_name = audio_file_name(text);
        let path = self.audio_dir.join(&file_name);
        tokio::fs::write(&path, &response.bytes)
            .await
            .with_context(|| format!("Failed to write audio file {}", path.display()))?;
        debug!(file = %file_name, bytes = response.bytes.len(), "Generated speech.");

        Ok(Some(format!("{AUDIO_URL_PREFIX}/{file_name}")))
    }
}
