//! Main Entrypoint for the WorldSense API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Initializing the inference collaborators (responder, transcriber, synthesizer).
//! 4. Starting the audio janitor.
//! 5. Constructing the Axum router and applying middleware.
//! 6. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use worldsense_api::{
    config::Config, router::create_router, state::AppState, ws::registry::SessionRegistry,
};
use worldsense_core::{OpenAICompatibleResponder, OpenAITranscriber, SpeechFileSynthesizer};

const JANITOR_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
    shutdown.cancel();
}

/// Periodically deletes synthesized audio that clients no longer need.
async fn run_audio_janitor(
    synthesizer: Arc<SpeechFileSynthesizer>,
    max_age: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(JANITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match synthesizer.cleanup_older_than(max_age).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed stale audio files."),
            Err(e) => warn!(error = ?e, "Audio cleanup failed."),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Collaborators ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);

    let responder = Arc::new(OpenAICompatibleResponder::new(
        openai_config.clone(),
        config.vision_model.clone(),
        config.responder_streaming,
    ));
    let transcriber = Arc::new(OpenAITranscriber::new(
        openai_config.clone(),
        config.transcription_model.clone(),
    ));
    let synthesizer = Arc::new(
        SpeechFileSynthesizer::new(
            openai_config,
            config.speech_model.clone(),
            config.speech_voice.clone(),
            config.audio_dir.clone(),
        )
        .context("Failed to initialize speech synthesizer")?,
    );

    let app_state = Arc::new(AppState {
        registry: Arc::new(SessionRegistry::new()),
        responder,
        transcriber,
        synthesizer: synthesizer.clone(),
        settings: Arc::new(config.session.clone()),
    });

    // --- 4. Start the Audio Janitor ---
    let shutdown = CancellationToken::new();
    let janitor = tokio::spawn(run_audio_janitor(
        synthesizer,
        config.audio_max_age,
        shutdown.clone(),
    ));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state, &config.audio_dir, config.max_upload_bytes).layer(cors);

    // --- 6. Start Server ---
    info!(
        vision_model = %config.vision_model,
        streaming = config.responder_streaming,
        audio_dir = %config.audio_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    janitor.await?;
    info!("Server has shut down.");
    Ok(())
}
