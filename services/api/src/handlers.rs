//! Axum Handlers for the REST API
//!
//! This module contains the plain request/response endpoints that sit beside
//! the WebSocket session: health, one-shot vision queries, transcription and
//! the voice catalogue. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{
        Multipart, State, multipart::MultipartRejection, rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use worldsense_core::{AudioClip, GenerationOptions, ImageFrame};

use crate::{
    models::{
        ErrorResponse, HealthResponse, QueryPayload, QueryResponse, ResponderHealth,
        SynthesizerHealth, TranscriberHealth, TranscriptionResponse, VoicesResponse,
    },
    state::AppState,
};

/// Multipart field carrying the recording in `/api/whisper/transcribe`.
const AUDIO_FIELD: &str = "audio";
const DEFAULT_AUDIO_FILE_NAME: &str = "audio.wav";

pub enum ApiError {
    BadRequest(String),
    /// The request body was refused before the handler could use it.
    Rejected(StatusCode, String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Keeps the status an extractor chose but answers with the JSON error body.
    fn rejected(status: StatusCode, message: String) -> Self {
        warn!(%status, message = %message, "Rejected request body.");
        Self::Rejected(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::Rejected(status, message) => {
                (status, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new(err.to_string())),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Report collaborator readiness and the number of live sessions.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        responder: ResponderHealth {
            model: state.responder.model().to_string(),
            ready: state.responder.is_ready(),
            streaming: state.responder.supports_streaming(),
        },
        transcriber: TranscriberHealth {
            model: state.transcriber.model().to_string(),
            ready: state.transcriber.is_ready(),
        },
        synthesizer: SynthesizerHealth {
            backend: state.synthesizer.backend().to_string(),
            ready: state.synthesizer.is_ready(),
        },
        active_connections: state.registry.active_count(),
    })
}

/// Answer one question about one image, without streaming.
#[utoipa::path(
    post,
    path = "/api/llava/query",
    request_body = QueryPayload,
    responses(
        (status = 200, description = "Generated answer", body = QueryResponse),
        (status = 400, description = "Malformed JSON or an image that could not be decoded", body = ErrorResponse),
        (status = 413, description = "Request body exceeds the upload limit", body = ErrorResponse),
        (status = 415, description = "Body is not `application/json`", body = ErrorResponse),
        (status = 422, description = "Body does not match the query schema", body = ErrorResponse),
        (status = 500, description = "The responder failed", body = ErrorResponse)
    )
)]
pub async fn llava_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryPayload>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(payload) = payload.map_err(|r| ApiError::rejected(r.status(), r.body_text()))?;
    let image = ImageFrame::from_base64(&payload.image)
        .map_err(|e| ApiError::BadRequest(format!("Could not decode image: {e}")))?;

    let response = state
        .responder
        .generate(&image, &payload.question, GenerationOptions::full())
        .await?;
    info!(chars = response.len(), "Answered one-shot query.");

    Ok(Json(QueryResponse {
        success: true,
        response,
        question: payload.question,
    }))
}

/// Transcribe an uploaded recording.
#[utoipa::path(
    post,
    path = "/api/whisper/transcribe",
    request_body(content_type = "multipart/form-data", description = "Multipart form with an `audio` file field"),
    responses(
        (status = 200, description = "Transcribed text", body = TranscriptionResponse),
        (status = 400, description = "No usable audio in the request", body = ErrorResponse),
        (status = 413, description = "Upload exceeds the size limit", body = ErrorResponse),
        (status = 500, description = "The transcriber failed", body = ErrorResponse)
    )
)]
pub async fn whisper_transcribe(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let mut multipart = multipart.map_err(|r| ApiError::rejected(r.status(), r.body_text()))?;
    let mut clip = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?
    {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .unwrap_or(DEFAULT_AUDIO_FILE_NAME)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
        clip = Some(AudioClip::new(file_name, bytes));
        break;
    }

    let clip = clip
        .ok_or_else(|| ApiError::BadRequest(format!("Missing `{AUDIO_FIELD}` file field")))?;
    if clip.bytes.is_empty() {
        warn!("Rejected empty audio upload.");
        return Err(ApiError::BadRequest("Uploaded audio is empty".to_string()));
    }

    let transcription = state.transcriber.transcribe(clip).await?;
    Ok(Json(TranscriptionResponse {
        success: true,
        text: transcription.text,
        language: transcription.language,
    }))
}

/// List the voices the synthesizer can speak with.
#[utoipa::path(
    get,
    path = "/api/tts/voices",
    responses(
        (status = 200, description = "Available voices", body = VoicesResponse)
    )
)]
pub async fn tts_voices(State(state): State<Arc<AppState>>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        voices: state
            .synthesizer
            .voices()
            .into_iter()
            .map(Into::into)
            .collect(),
    })
}
