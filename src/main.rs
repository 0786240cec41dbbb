//! # Quran Correct Backend - Main Application Entry Point
//!
//! This is the main entry point for the quran-correct-backend web server.
//! It sets up an Actix-web HTTP server around a simple pipeline: accept a
//! recitation recording plus its reference ayah, transcribe the audio with a
//! Whisper model in the background, and serve the diff between reference and
//! recognized text from a persisted task table.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **state**: Shared application state (store, engine, queue, metrics)
//! - **tasks**: Task table (SQLite + cache) and the background correction queue
//! - **transcription**: Whisper model management and inference via Candle
//! - **audio**: Decoding uploads into the sample format the model expects
//! - **diff**: Recitation feedback between reference and recognized text
//! - **health**: System health monitoring endpoints
//! - **middleware**: Request logging and per-endpoint metrics
//! - **handlers**: HTTP request handlers for the API endpoints
//! - **error**: Custom error types and HTTP error responses

mod audio;
mod config;
mod device;
mod diff;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod tasks;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::{AppMetrics, AppState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tasks::{TaskQueue, TaskStore};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ModelSize, Transcriber, TranscriptionConfig, TranscriptionEngine};

/// Global shutdown signal, set by the signal handler task and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Opens the task store** and replays the schema idempotently
/// 3. **Creates the transcription engine** and starts the model load in the background
/// 4. **Spawns the correction worker pool** behind the bounded queue
/// 5. **Configures the HTTP server** with middleware and routes
/// 6. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting quran-correct-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    // The task table and its cache outlive any single request; handlers and
    // workers all share this handle.
    let store = TaskStore::open(
        config.storage.database_path.clone(),
        config.storage.cache_capacity,
    )
    .await?;

    let device = device::create_device_from_string(&config.models.device);
    info!(
        "Transcription device: {}",
        device::DeviceManager::get_device_info(&device)
    );

    let engine = Arc::new(TranscriptionEngine::new(
        TranscriptionConfig {
            language: Some(config.models.language.clone()),
        },
        device,
    ));

    // Load the configured model off the startup path. Until it finishes,
    // health reports model_loaded=false and submitted tasks fail onto their
    // rows with a clear message.
    let model_size: ModelSize = config.models.whisper_model.parse()?;
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = engine.load_model(model_size).await {
                error!("Failed to load {} model at startup: {}", model_size, e);
                warn!("Transcription unavailable until a model is loaded via /api/v1/models/load");
            }
        });
    }

    let metrics = Arc::new(RwLock::new(AppMetrics::default()));
    let transcriber: Arc<dyn Transcriber> = engine.clone();
    let queue = TaskQueue::start(
        store.clone(),
        transcriber,
        &config.worker,
        Arc::clone(&metrics),
    );

    let app_state = AppState::new(
        config.clone(),
        store,
        engine,
        queue,
        metrics,
    );
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/quran-correct", web::post().to(handlers::quran_correct))
                    .route("/tasks", web::get().to(handlers::list_tasks))
                    .route("/tasks/{task_id}", web::get().to(handlers::get_task))
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/models/load", web::post().to(handlers::load_model))
                    .route("/models/unload", web::post().to(handlers::unload_model)),
            )
            // Health check at root level for load balancers and probes
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "quran_correct_backend=debug")
/// - If not set, defaults to "quran_correct_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quran_correct_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT; whichever arrives first sets the global
/// shutdown flag so current requests can finish before the process exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// Simple polling with a 100ms sleep; avoids busy-waiting without pulling in
/// an event mechanism for a flag that flips once per process lifetime.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
