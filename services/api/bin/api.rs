//! Main Entrypoint for the Kali-E API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting to the LiveKit server API when credentials are present.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use kalie_api::{
    agent::{LiveKitServer, RoomServer},
    config::Config,
    router::create_router,
    state::AppState,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Builds the LiveKit server client, or `None` when the backend should run
/// without one. Token endpoints then answer "Server misconfigured".
fn connect_room_server(config: &Config) -> anyhow::Result<Option<Arc<dyn RoomServer>>> {
    let credentials = match config.require_credentials() {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(error = %e, "LiveKit credentials not configured; tokens cannot be issued");
            return Ok(None);
        }
    };
    if config.livekit_url.is_empty() {
        warn!("LIVEKIT_URL not set; agent dispatch and room listing are disabled");
        return Ok(None);
    }
    let server = LiveKitServer::new(&config.livekit_url, credentials)
        .context("Failed to create LiveKit server client")?;
    Ok(Some(Arc::new(server)))
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

    // --- 3. Initialize LiveKit Client ---
    let room_server = connect_room_server(&config)?;
    let app_state = Arc::new(AppState::new(config.clone(), room_server));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        livekit_url = %config.livekit_url,
        agent = %config.agent_name,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
