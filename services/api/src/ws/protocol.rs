//! Defines the WebSocket message protocol between the browser client and the API server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Question used when a `llava_query` arrives without one.
pub const DEFAULT_QUESTION: &str = "What do you see?";

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe, answered with `pong`.
    Ping,
    /// Starts periodic summaries of the latest camera frame.
    StartMonitoring,
    /// Stops periodic summaries.
    StopMonitoring,
    /// A typed question about an image, answered as a stream.
    LlavaQuery {
        image: String,
        #[serde(default = "default_question")]
        question: String,
    },
    /// A spoken question, already transcribed by the browser.
    VoiceQuery { image: String, text: String },
    /// The latest camera frame, stored for monitoring.
    CameraFrame { image: String },
}

fn default_question() -> String {
    DEFAULT_QUESTION.to_string()
}

const KNOWN_KINDS: [&str; 6] = [
    "ping",
    "start_monitoring",
    "stop_monitoring",
    "llava_query",
    "voice_query",
    "camera_frame",
];

/// Why an inbound text frame could not be turned into a `ClientMessage`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Message has no `type` field")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid `{kind}` message: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("Binary frames are not supported")]
    BinaryFrame,
}

impl ClientMessage {
    /// Parses one inbound text frame.
    ///
    /// The `type` discriminant is checked on its own first, so an unknown kind
    /// and a known kind with bad fields are reported differently.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
            kind,
            reason: e.to_string(),
        })
    }
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    /// Reports whether continuous monitoring is running.
    MonitoringStatus { active: bool, message: String },
    /// A periodic observation of the latest camera frame.
    VisionUpdate { observation: String, timestamp: f64 },
    /// Opens a streamed answer and echoes the prompt actually sent to the model.
    LlavaStart { question: String },
    /// One fragment of a streamed answer.
    ResponseChunk { text: String, done: bool },
    /// Closes a streamed answer.
    ResponseComplete {
        full_text: String,
        audio_url: Option<String>,
        done: bool,
    },
    Error { message: String },
}

impl ServerMessage {
    pub fn monitoring_status(active: bool, message: impl Into<String>) -> Self {
        Self::MonitoringStatus {
            active,
            message: message.into(),
        }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        Self::ResponseChunk {
            text: text.into(),
            done: false,
        }
    }

    pub fn complete(full_text: String, audio_url: Option<String>) -> Self {
        Self::ResponseComplete {
            full_text,
            audio_url,
            done: true,
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// The wire discriminant, handy for logs and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::MonitoringStatus { .. } => "monitoring_status",
            Self::VisionUpdate { .. } => "vision_update",
            Self::LlavaStart { .. } => "llava_start",
            Self::ResponseChunk { .. } => "response_chunk",
            Self::ResponseComplete { .. } => "response_complete",
            Self::Error { .. } => "error",
        }
    }
}
