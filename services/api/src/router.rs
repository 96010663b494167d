//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the WebSocket endpoint, synthesized audio and the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ErrorResponse, HealthResponse, QueryPayload, QueryResponse, ResponderHealth,
        SynthesizerHealth, TranscriberHealth, TranscriptionResponse, Voice, VoicesResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::{path::Path, sync::Arc};
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use worldsense_core::synthesizer::AUDIO_URL_PREFIX;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::llava_query,
        handlers::whisper_transcribe,
        handlers::tts_voices,
    ),
    components(
        schemas(
            QueryPayload,
            QueryResponse,
            TranscriptionResponse,
            HealthResponse,
            ResponderHealth,
            TranscriberHealth,
            SynthesizerHealth,
            Voice,
            VoicesResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "WorldSense API", description = "Vision queries, transcription and speech for the WorldSense assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
///
/// Synthesized audio is served from `audio_dir`. Request bodies on the API
/// routes may be up to `max_upload_bytes` long.
pub fn create_router(
    app_state: Arc<AppState>,
    audio_dir: &Path,
    max_upload_bytes: usize,
) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/llava/query", post(handlers::llava_query))
        .route("/api/whisper/transcribe", post(handlers::whisper_transcribe))
        .route("/api/tts/voices", get(handlers::tts_voices))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest_service(AUDIO_URL_PREFIX, ServeDir::new(audio_dir))
        .merge(api_router)
}
