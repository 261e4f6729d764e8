//! # Interview Coach Backend - Main Application Entry Point
//!
//! HTTP backend for the mock-interview simulator. It exposes a REST surface
//! for starting, stopping, and inspecting live interview sessions; each live
//! session runs a real-time audio loop against the upstream conversational
//! agent (microphone capture → PCM encode → stream; receive → decode →
//! gapless playback with barge-in interruption).
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + APP_ environment variables)
//! - **state**: shared application state, metrics, collaborators
//! - **audio**: PCM codec, microphone capture, playback scheduling and mixing
//! - **transport**: WebSocket connection to the live agent
//! - **session**: the per-interview controller and the session registry
//! - **coaching**: post-session feedback, history store, behavioral mock
//! - **middleware / handlers / health / error**: the HTTP surface

mod audio;
mod coaching;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;
mod transport;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use coaching::{BehavioralAnalyzer, FeedbackService};
use config::AppConfig;
use session::SessionManager;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-coach-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    // Collaborators shared by every session
    let sessions = Arc::new(SessionManager::new(config.performance.max_concurrent_sessions));
    let store = Arc::new(coaching::store::JsonFileStore::open(
        &config.coaching.history_path,
    )?);
    let analyzer = Arc::new(BehavioralAnalyzer::new());
    let feedback: Arc<dyn FeedbackService> =
        match std::env::var(&config.coaching.api_key_env) {
            Ok(api_key) if !api_key.is_empty() => {
                info!(model = %config.coaching.feedback_model, "Using generative feedback analyzer");
                Arc::new(coaching::feedback::GenerativeFeedbackClient::new(
                    api_key,
                    config.coaching.feedback_model.clone(),
                ))
            }
            _ => {
                warn!(
                    "{} not set, falling back to canned feedback",
                    config.coaching.api_key_env
                );
                Arc::new(coaching::feedback::CannedFeedback)
            }
        };

    let app_state = AppState::new(
        config.clone(),
        sessions.clone(),
        feedback,
        store,
        analyzer,
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
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/interview/session", web::post().to(handlers::start_interview))
                    .route(
                        "/interview/session/{id}",
                        web::delete().to(handlers::stop_interview),
                    )
                    .route(
                        "/interview/session/{id}",
                        web::get().to(handlers::session_status),
                    )
                    .route(
                        "/interview/history/{user_id}",
                        web::get().to(handlers::interview_history),
                    )
                    .route(
                        "/interview/confidence",
                        web::get().to(handlers::realtime_confidence),
                    )
                    .route("/interview/fields", web::get().to(handlers::interview_fields)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

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

            // Close live sessions first so devices and transports release
            // before the process exits
            for handle in sessions.drain() {
                info!(session_id = %handle.session_id, "Stopping session for shutdown");
                handle.stop().await;
            }

            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_coach_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
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

/// Poll the shutdown flag until a signal handler sets it.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
