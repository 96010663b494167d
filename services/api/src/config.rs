use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Default upload limit for audio recordings and base64 frames, in MiB.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 25;

/// Tunables for the per-connection session machinery.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// Pause between two monitoring ticks.
    pub monitor_interval: Duration,
    /// Consecutive failed ticks after which monitoring gives up.
    /// `None` keeps the loop running no matter how many ticks fail.
    pub monitor_max_failures: Option<u32>,
    /// Delay between two `response_chunk` sends. Zero disables pacing.
    pub chunk_pacing: Duration,
    /// Persona name used when wrapping conversational questions.
    pub assistant_name: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(3),
            monitor_max_failures: None,
            chunk_pacing: Duration::from_millis(50),
            assistant_name: "Jarvis".to_string(),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub vision_model: String,
    pub responder_streaming: bool,
    pub transcription_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    pub audio_dir: PathBuf,
    pub audio_max_age: Duration,
    /// Largest request body accepted by the REST upload routes.
    pub max_upload_bytes: usize,
    pub log_level: Level,
    pub session: SessionSettings,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:8080");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");

        let vision_model = var_or("VISION_MODEL", "gpt-4o-mini");
        let responder_streaming = parse_var("RESPONDER_STREAMING", true)?;
        let transcription_model = var_or("TRANSCRIPTION_MODEL", "whisper-1");
        let speech_model = var_or("SPEECH_MODEL", "tts-1");
        let speech_voice = var_or("SPEECH_VOICE", "alloy");

        let audio_dir = std::env::var("AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./static/audio"));
        let audio_max_age = Duration::from_secs(parse_var("AUDIO_MAX_AGE_HOURS", 24u64)? * 3600);

        let max_upload_mb: usize = parse_var("MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;
        if max_upload_mb == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_UPLOAD_MB".to_string(),
                "must be a positive number of megabytes".to_string(),
            ));
        }
        let max_upload_bytes = max_upload_mb.saturating_mul(1024 * 1024);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let defaults = SessionSettings::default();
        let monitor_interval_secs: f64 = parse_var(
            "MONITOR_INTERVAL_SECS",
            defaults.monitor_interval.as_secs_f64(),
        )?;
        let monitor_interval = Duration::try_from_secs_f64(monitor_interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MONITOR_INTERVAL_SECS".to_string(),
                    "must be a positive number of seconds".to_string(),
                )
            })?;
        let monitor_max_failures = match std::env::var("MONITOR_MAX_FAILURES") {
            Ok(raw) => Some(raw.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(
                || {
                    ConfigError::InvalidValue(
                        "MONITOR_MAX_FAILURES".to_string(),
                        format!("'{}' is not a positive integer", raw),
                    )
                },
            )?),
            Err(_) => None,
        };
        let chunk_pacing = Duration::from_millis(parse_var(
            "CHUNK_PACING_MS",
            defaults.chunk_pacing.as_millis() as u64,
        )?);
        let assistant_name = var_or("ASSISTANT_NAME", &defaults.assistant_name);

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            vision_model,
            responder_streaming,
            transcription_model,
            speech_model,
            speech_voice,
            audio_dir,
            audio_max_age,
            max_upload_bytes,
            log_level,
            session: SessionSettings {
                monitor_interval,
                monitor_max_failures,
                chunk_pacing,
                assistant_name,
            },
        })
    }
}
