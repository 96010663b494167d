//! Continuous vision monitoring.
//!
//! While monitoring is on, a background task periodically asks the responder
//! to summarise the session's latest camera frame and pushes the result to the
//! client as a `vision_update`.

use super::{
    protocol::ServerMessage,
    registry::{Session, SessionId},
};
use crate::state::AppState;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use worldsense_core::GenerationOptions;

/// Fixed short-form prompt for periodic summaries.
pub const MONITOR_PROMPT: &str = "Briefly describe what you see in 1-2 sentences.";

/// Handles `start_monitoring`. Starting while already monitoring only
/// reports the current status.
pub fn start_monitoring(state: &Arc<AppState>, session: &Session) {
    let started = session.start_monitor(|token| {
        // Sent before the task exists, so it always precedes the first update.
        session.send(ServerMessage::monitoring_status(
            true,
            "Continuous vision monitoring started",
        ));
        let span = tracing::info_span!("monitor", session_id = %session.id());
        tokio::spawn(
            run_monitor_loop(state.clone(), session.id().to_string(), token).instrument(span),
        )
    });

    if started {
        info!("Started monitoring.");
    } else {
        session.send(ServerMessage::monitoring_status(
            true,
            "Monitoring already active",
        ));
    }
}

/// Handles `stop_monitoring`. The status reply is sent even if monitoring was
/// not running.
pub fn stop_monitoring(session: &Session) {
    if session.stop_monitor() {
        info!("Stopped monitoring.");
    }
    session.send(ServerMessage::monitoring_status(
        false,
        "Continuous vision monitoring stopped",
    ));
}

/// Current Unix time in fractional seconds.
fn unix_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// The monitoring cycle: summarise the latest frame, report, sleep, repeat.
///
/// Cancellation is checked at every suspension point. A responder call that
/// is in flight when the token fires is dropped and its result discarded.
async fn run_monitor_loop(state: Arc<AppState>, session_id: SessionId, token: CancellationToken) {
    let settings = state.settings.clone();
    let mut consecutive_failures: u32 = 0;

    loop {
        // The session leaving the registry ends the loop even without a cancel.
        let Some(session) = state.registry.get(&session_id) else {
            break;
        };

        if let Some(frame) = session.last_frame() {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = state.responder.generate(
                    &frame.image,
                    MONITOR_PROMPT,
                    GenerationOptions::monitoring(),
                ) => result,
            };

            match result {
                Ok(observation) => {
                    consecutive_failures = 0;
                    let update = ServerMessage::VisionUpdate {
                        observation,
                        timestamp: unix_timestamp(),
                    };
                    if !session.send_from_monitor(&token, update) {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = ?e, consecutive_failures, "Monitoring tick failed.");
                    if settings
                        .monitor_max_failures
                        .is_some_and(|limit| consecutive_failures >= limit)
                    {
                        warn!(consecutive_failures, "Giving up on monitoring.");
                        session.finish_monitor(
                            &token,
                            [
                                ServerMessage::error(format!("Vision monitoring failed: {e}")),
                                ServerMessage::monitoring_status(
                                    false,
                                    format!(
                                        "Monitoring stopped after {consecutive_failures} consecutive failures"
                                    ),
                                ),
                            ],
                        );
                        break;
                    }
                }
            }
        }
        drop(session);

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(settings.monitor_interval) => {}
        }
    }

    debug!("Monitoring loop finished.");
}
