//! Manages the WebSocket connection lifecycle for a client session.

use super::{
    error::SessionError,
    monitor,
    protocol::{ClientMessage, ProtocolError, ServerMessage},
    registry::SessionGuard,
    relay,
};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};
use worldsense_core::ImageFrame;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Registers the session, then reads inbound frames one at a time until the
/// client leaves or the transport breaks. The session is torn down when the
/// guard goes out of scope, whichever way this function returns.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (socket_tx, mut socket_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let transport_lost = CancellationToken::new();

    let writer = tokio::spawn(
        write_outbound(socket_tx, outbound_rx, transport_lost.clone()).in_current_span(),
    );

    let session_id = state.registry.connect(outbound_tx);
    tracing::Span::current().record("session_id", session_id.as_str());
    let guard = SessionGuard::new(state.registry.clone(), session_id);

    loop {
        let frame = tokio::select! {
            _ = transport_lost.cancelled() => {
                let err = SessionError::Transport("write to client failed".to_string());
                warn!(error = %err, "Ending session.");
                break;
            }
            frame = socket_rx.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => dispatch(&state, guard.id(), text.as_str()).await,
            Some(Ok(Message::Binary(data))) => {
                debug!(bytes = data.len(), "Rejected binary frame.");
                state.registry.send(
                    guard.id(),
                    SessionError::from(ProtocolError::BinaryFrame).to_client_message(),
                );
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!("Client closed the connection.");
                break;
            }
            Some(Err(e)) => {
                let err = SessionError::Transport(e.to_string());
                warn!(error = %err, "Ending session.");
                break;
            }
        }
    }

    // Disconnecting drops the last sender, so the writer drains and closes.
    drop(guard);
    if let Err(e) = writer.await {
        warn!(error = ?e, "Writer task ended abnormally.");
    }
}

/// Handles one inbound text frame. Never fails: every problem is reported
/// to the client as an `error` message.
pub(crate) async fn dispatch(state: &Arc<AppState>, session_id: &str, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Rejected inbound message.");
            state
                .registry
                .send(session_id, SessionError::from(e).to_client_message());
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            state.registry.send(session_id, ServerMessage::Pong);
        }
        ClientMessage::StartMonitoring => {
            if let Some(session) = state.registry.get(session_id) {
                monitor::start_monitoring(state, &session);
            }
        }
        ClientMessage::StopMonitoring => {
            if let Some(session) = state.registry.get(session_id) {
                monitor::stop_monitoring(&session);
            }
        }
        ClientMessage::LlavaQuery { image, question } => {
            info!("Received llava_query.");
            relay::handle_query(state, session_id, &image, &question).await;
        }
        ClientMessage::VoiceQuery { image, text } => {
            info!(chars = text.len(), "Received voice_query.");
            relay::handle_query(state, session_id, &image, &text).await;
        }
        ClientMessage::CameraFrame { image } => match ImageFrame::from_base64(&image) {
            Ok(frame) => {
                state.registry.store_frame(session_id, frame);
            }
            Err(e) => {
                debug!(error = %e, "Rejected camera frame.");
                state
                    .registry
                    .send(session_id, SessionError::from(e).to_client_message());
            }
        },
    }
}

/// Owns the socket's write half: serializes queued messages onto it, and
/// closes it once every sender is gone.
async fn write_outbound(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    transport_lost: CancellationToken,
) {
    while let Some(msg) = outbound.recv().await {
        let serialized = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(error = ?e, kind = msg.kind(), "Failed to serialize message.");
                continue;
            }
        };
        if let Err(e) = socket_tx.send(Message::Text(serialized.into())).await {
            warn!(error = ?e, kind = msg.kind(), "Failed to write to client socket.");
            transport_lost.cancel();
            return;
        }
    }
    if let Err(e) = socket_tx.close().await {
        debug!(error = ?e, "Socket was already closed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::testing::{FakeResponder, png_base64, test_state};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn settings() -> SessionSettings {
        SessionSettings {
            chunk_pacing: Duration::ZERO,
            ..SessionSettings::default()
        }
    }

    fn connect(state: &Arc<AppState>) -> (String, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = unbounded_channel();
        (state.registry.connect(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_ping_yields_pong() {
        let state = test_state(Arc::new(FakeResponder::answering("ok")), settings());
        let (id, mut rx) = connect(&state);

        dispatch(&state, &id, r#"{"type":"ping"}"#).await;

        assert_eq!(drain(&mut rx), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn test_unknown_type_replies_error_and_keeps_session() {
        let state = test_state(Arc::new(FakeResponder::answering("ok")), settings());
        let (id, mut rx) = connect(&state);

        dispatch(&state, &id, r#"{"type":"dance"}"#).await;
        dispatch(&state, &id, "not json at all").await;
        dispatch(&state, &id, r#"{"type":"ping"}"#).await;

        let messages = drain(&mut rx);
        assert_eq!(messages[0], ServerMessage::error("Unknown message type: dance"));
        assert_eq!(messages[1].kind(), "error");
        assert_eq!(messages[2], ServerMessage::Pong);
        assert!(state.registry.contains(&id));
    }

    #[tokio::test]
    async fn test_camera_frame_is_stored_silently() {
        let state = test_state(Arc::new(FakeResponder::answering("ok")), settings());
        let (id, mut rx) = connect(&state);

        let frame = json!({"type": "camera_frame", "image": png_base64()}).to_string();
        dispatch(&state, &id, &frame).await;

        assert!(drain(&mut rx).is_empty());
        assert!(state.registry.latest_frame(&id).is_some());
    }

    #[tokio::test]
    async fn test_malformed_camera_frame_keeps_previous_frame() {
        let state = test_state(Arc::new(FakeResponder::answering("ok")), settings());
        let (id, mut rx) = connect(&state);

        let good = json!({"type": "camera_frame", "image": png_base64()}).to_string();
        dispatch(&state, &id, &good).await;
        let stored_at = state.registry.latest_frame(&id).unwrap().received_at;

        let bad = json!({"type": "camera_frame", "image": "@@@"}).to_string();
        dispatch(&state, &id, &bad).await;
        let missing = json!({"type": "camera_frame"}).to_string();
        dispatch(&state, &id, &missing).await;

        let kinds: Vec<_> = drain(&mut rx).iter().map(ServerMessage::kind).collect();
        assert_eq!(kinds, vec!["error", "error"]);
        assert_eq!(
            state.registry.latest_frame(&id).unwrap().received_at,
            stored_at
        );
    }

    #[tokio::test]
    async fn test_llava_query_without_question_uses_default() {
        let responder = Arc::new(FakeResponder::streaming(&["A mug."]));
        let state = test_state(responder.clone(), settings());
        let (id, mut rx) = connect(&state);

        let query = json!({"type": "llava_query", "image": png_base64()}).to_string();
        dispatch(&state, &id, &query).await;

        let kinds: Vec<_> = drain(&mut rx).iter().map(ServerMessage::kind).collect();
        assert_eq!(
            kinds,
            vec!["llava_start", "response_chunk", "response_complete"]
        );
        assert_eq!(
            responder.last_prompt(),
            Some(relay::derive_prompt("What do you see?", "Jarvis"))
        );
    }

    #[tokio::test]
    async fn test_voice_query_uses_transcribed_text() {
        let responder = Arc::new(FakeResponder::streaming(&["Hi!"]));
        let state = test_state(responder.clone(), settings());
        let (id, mut rx) = connect(&state);

        let query =
            json!({"type": "voice_query", "image": png_base64(), "text": "good morning"}).to_string();
        dispatch(&state, &id, &query).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.last().map(ServerMessage::kind), Some("response_complete"));
        assert!(
            responder
                .last_prompt()
                .is_some_and(|p| p.ends_with("User says: good morning"))
        );
    }

    #[tokio::test]
    async fn test_voice_query_without_text_is_malformed() {
        let responder = Arc::new(FakeResponder::streaming(&["unused"]));
        let state = test_state(responder.clone(), settings());
        let (id, mut rx) = connect(&state);

        let query = json!({"type": "voice_query", "image": png_base64()}).to_string();
        dispatch(&state, &id, &query).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), "error");
        assert_eq!(responder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_control_messages() {
        let state = test_state(
            Arc::new(FakeResponder::answering("ok")),
            SessionSettings::default(),
        );
        let (id, mut rx) = connect(&state);

        dispatch(&state, &id, r#"{"type":"start_monitoring"}"#).await;
        assert!(state.registry.get(&id).unwrap().is_monitoring());
        dispatch(&state, &id, r#"{"type":"stop_monitoring"}"#).await;
        assert!(!state.registry.get(&id).unwrap().is_monitoring());

        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::monitoring_status(true, "Continuous vision monitoring started"),
                ServerMessage::monitoring_status(false, "Continuous vision monitoring stopped"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_of_one_client_leaves_the_other_alone() {
        let state = test_state(
            Arc::new(FakeResponder::answering("ok")),
            SessionSettings::default(),
        );
        let (a, _rx_a) = connect(&state);
        let (b, mut rx_b) = connect(&state);
        let frame = json!({"type": "camera_frame", "image": png_base64()}).to_string();
        dispatch(&state, &a, &frame).await;

        dispatch(&state, &a, r#"{"type":"start_monitoring"}"#).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(SessionGuard::new(state.registry.clone(), a.clone()));

        assert!(!state.registry.contains(&a));
        assert!(state.registry.contains(&b));
        assert_eq!(state.registry.active_count(), 1);

        dispatch(&state, &b, r#"{"type":"ping"}"#).await;
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn test_dispatch_for_departed_session_is_silent() {
        let state = test_state(Arc::new(FakeResponder::answering("ok")), settings());
        let (id, _rx) = connect(&state);
        state.registry.disconnect(&id);

        dispatch(&state, &id, r#"{"type":"ping"}"#).await;
        dispatch(&state, &id, r#"{"type":"start_monitoring"}"#).await;
        let frame = json!({"type": "camera_frame", "image": png_base64()}).to_string();
        dispatch(&state, &id, &frame).await;

        assert_eq!(state.registry.active_count(), 0);
    }
}
