//! Error taxonomy for WebSocket sessions.
//!
//! Only `Transport` ends a connection. Every other kind is scoped to a single
//! message, exchange or monitoring tick and is reported to the client as an
//! `error` message.

use super::protocol::{ProtocolError, ServerMessage};
use worldsense_core::DecodeError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed or unknown inbound message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// An image or audio payload that cannot be decoded.
    #[error("Could not decode image: {0}")]
    Decode(#[from] DecodeError),
    /// A Responder, Transcriber or Synthesizer call failed.
    #[error("{0}")]
    Collaborator(anyhow::Error),
    /// The connection to the client is gone.
    #[error("Connection lost: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn collaborator(err: impl Into<anyhow::Error>) -> Self {
        Self::Collaborator(err.into())
    }

    /// The message the client receives for a non-fatal error.
    pub fn to_client_message(&self) -> ServerMessage {
        ServerMessage::error(self)
    }
}
