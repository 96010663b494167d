//! Streams one query/response exchange back to the client.

use super::{error::SessionError, protocol::ServerMessage};
use crate::state::AppState;
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use tracing::{error, info, warn};
use worldsense_core::{
    GenerationOptions, ImageFrame, TokenStream, responder::word_chunks,
};

const VISUAL_CUES: [&str; 3] = ["what", "describe", "see"];
const DETAIL_CUES: [&str; 2] = ["detail", "more"];
const CONCISE_SUFFIX: &str = "Answer concisely in 1-2 sentences. Focus on the main subject.";

/// Turns the user's raw question into the prompt sent to the responder.
///
/// Visual questions get a concision hint unless the user asked for detail.
/// Anything else is treated as conversation and wrapped in the assistant
/// persona.
pub fn derive_prompt(raw_question: &str, assistant_name: &str) -> String {
    let lower = raw_question.to_lowercase();
    let is_visual = VISUAL_CUES.iter().any(|cue| lower.contains(cue));
    if is_visual {
        if DETAIL_CUES.iter().any(|cue| lower.contains(cue)) {
            raw_question.to_string()
        } else {
            format!("{raw_question} {CONCISE_SUFFIX}")
        }
    } else {
        format!(
            "You are {assistant_name}, a helpful AI assistant. The user is talking to you. \
             Answer their question naturally and concisely in English only. User says: {raw_question}"
        )
    }
}

/// Handles a single `llava_query` or `voice_query`.
///
/// The client receives `llava_start`, then one `response_chunk` per token in
/// generation order, then `response_complete`. Every failure is reported as an
/// `error` message and ends only this exchange.
pub async fn handle_query(state: &Arc<AppState>, session_id: &str, image: &str, question: &str) {
    let image = match ImageFrame::from_base64(image) {
        Ok(image) => image,
        Err(e) => {
            warn!(error = %e, "Rejected query with undecodable image.");
            state
                .registry
                .send(session_id, SessionError::from(e).to_client_message());
            return;
        }
    };

    let prompt = derive_prompt(question, &state.settings.assistant_name);
    state.registry.send(
        session_id,
        ServerMessage::LlavaStart {
            question: prompt.clone(),
        },
    );

    let full_text = match relay_tokens(state, session_id, &image, &prompt).await {
        Ok(text) => text,
        Err(e) => {
            // The client is waiting for a terminal message after `llava_start`.
            error!(error = %e, "Streaming response failed.");
            state.registry.send(session_id, e.to_client_message());
            return;
        }
    };

    let audio_url = match state.synthesizer.synthesize(&full_text).await {
        Ok(url) => url,
        Err(e) => {
            warn!(error = ?e, "Speech synthesis failed; completing without audio.");
            None
        }
    };

    info!(
        chars = full_text.len(),
        has_audio = audio_url.is_some(),
        "Query answered."
    );
    state
        .registry
        .send(session_id, ServerMessage::complete(full_text, audio_url));
}

/// Forwards every token to the client and returns the accumulated text.
async fn relay_tokens(
    state: &Arc<AppState>,
    session_id: &str,
    image: &ImageFrame,
    prompt: &str,
) -> Result<String, SessionError> {
    let mut tokens = open_token_stream(state, image, prompt).await?;
    let pacing = state.settings.chunk_pacing;

    let mut full_text = String::new();
    while let Some(token) = tokens.next().await {
        let token = token.map_err(SessionError::collaborator)?;
        full_text.push_str(&token);
        state.registry.send(session_id, ServerMessage::chunk(token));
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }
    Ok(full_text)
}

/// Streams from the responder, or splits a one-shot answer into words when
/// the responder cannot stream.
async fn open_token_stream(
    state: &Arc<AppState>,
    image: &ImageFrame,
    prompt: &str,
) -> Result<TokenStream, SessionError> {
    let responder = &state.responder;
    if responder.supports_streaming() {
        return responder
            .generate_stream(image, prompt)
            .await
            .map_err(SessionError::collaborator);
    }

    let text = responder
        .generate(image, prompt, GenerationOptions::full())
        .await
        .map_err(SessionError::collaborator)?;
    Ok(Box::pin(stream::iter(word_chunks(&text).into_iter().map(Ok))))
}
