//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the session
//! registry and the inference collaborators shared by every connection.

use crate::{config::SessionSettings, ws::registry::SessionRegistry};
use std::sync::Arc;
use worldsense_core::{Responder, Synthesizer, Transcriber};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub responder: Arc<dyn Responder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub settings: Arc<SessionSettings>,
}
