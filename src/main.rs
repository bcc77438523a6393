//! # Telnyx Media Ingest - Main Application Entry Point
//!
//! Actix-web server that accepts Telnyx media streams over WebSocket and turns
//! vendor codec payloads into 16 kHz PCM16.
//!
//! ## Application Architecture:
//! - **amrwb**: AMR-WB wire formats (RTP strip, BE, octet-aligned, storage) and candidate selection
//! - **decoder**: external ffmpeg process, streaming and one-shot
//! - **audio**: per-call sessions, frame buffer, dedupe, PCM normalization, G.711
//! - **websocket**: Telnyx `start` / `media` / `stop` stream handler
//! - **config**: defaults, `config.toml` and environment variables
//! - **state**: shared state and metrics
//! - **health**, **handlers**: health, metrics, config and debug endpoints
//! - **middleware**: per-endpoint request metrics
//! - **error**: HTTP error responses

mod amrwb;       // AMR-WB parsing and repacking (amrwb/ directory)
mod audio;       // Codec sessions and PCM (audio/ directory)
mod config;      // Configuration management (config.rs)
mod decoder;     // ffmpeg decoder process (decoder/ directory)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod state;       // Application state management (state.rs)
mod websocket;   // Telnyx media stream handler (websocket.rs)

use actix_cors::Cors;
use actix_web::{middleware::from_fn, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// 1. **Loads configuration** from `config.toml` and environment variables
/// 2. **Sets up logging**
/// 3. **Creates shared application state** (codec registry, artifact writer)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown**, killing every decoder process on the way out
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting telnyx-media-ingest v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        ffmpeg_path = %config.amrwb.ffmpeg_path,
        require_be = config.amrwb.require_be,
        max_sessions = config.performance.max_sessions,
        artifact_dir = ?config.artifacts.dir,
        "Configuration loaded"
    );

    let app_state = AppState::new(config.clone());
    let registry = app_state.registry.clone();
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
            // Middleware executes in reverse order of registration for requests
            .wrap(cors)
            .wrap(from_fn(middleware::record_http_metrics))
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .configure(handlers::configure_debug_routes)
            .route("/ws/telnyx", web::get().to(websocket::telnyx_websocket))
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
            server_handle.stop(true).await;
        }
    }

    let open_sessions = registry.len().await;
    registry.close_all().await;
    info!(closed_sessions = open_sessions, "Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` controls the filter; without it the default is
/// `telnyx_media_ingest=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telnyx_media_ingest=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise [`SHUTDOWN_SIGNAL`].
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers, relying on server exit: {}", e);
                return;
            }
        };

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

/// Poll [`SHUTDOWN_SIGNAL`] every 100 ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
