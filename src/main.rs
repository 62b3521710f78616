//! Print Farm Dashboard
//!
//! Live status and remote control for Klipper and OctoPrint printers behind
//! a Home Assistant gateway.

use print_farm_dashboard::{api, app, bus, config, gateway, ui};

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "print_farm_dashboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Print Farm Dashboard v{} ({})",
        env!("PFD_VERSION"),
        env!("PFD_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, gateway: {}",
        config.port,
        config.gateway.base_url
    );

    // Create event bus
    let bus = bus::create_bus();

    let gateway = Arc::new(gateway::http::HttpGateway::with_timeout(
        &config.gateway.base_url,
        config.gateway.timeout(),
    )?);

    let dashboard = Arc::new(
        app::Dashboard::new(gateway, bus, app::DashboardSettings::from(&config))
            .with_preferences(config::load_ui_preferences()),
    );

    // A failed first load leaves the page in its error state with a retry button
    match dashboard.start().await {
        Ok(count) => tracing::info!("Loaded {} printers", count),
        Err(e) => tracing::warn!("{}", e),
    }

    let state = api::AppState::new(dashboard.clone());

    // Build API routes (one route per line, see tests/api_contract.rs)
    let app = Router::new()
        // Web UI
        .route("/", get(ui::dashboard_page))
        // Health check
        .route("/api/status", get(api::status_handler))
        // View state and event stream (SSE)
        .route("/api/view", get(api::view_handler))
        .route("/api/events", get(api::events_handler))
        .route("/api/refresh", post(api::refresh_handler))
        .route("/api/filters", post(api::filters_handler))
        .route("/api/visibility", post(api::visibility_handler))
        .route("/api/preferences", post(api::preferences_handler))
        .route("/api/notifications/{id}", delete(api::dismiss_notification_handler))
        // Printer actions
        .route("/api/printers/{name}/actions", post(api::action_handler))
        .route("/api/confirm", post(api::confirm_handler))
        // Modals
        .route("/api/modals/{kind}/close", post(api::close_modal_handler))
        .route("/api/modals/escape", post(api::escape_handler))
        // Movement
        .route("/api/printers/{name}/movement", post(api::open_movement_handler))
        .route("/api/movement/distance", post(api::jog_distance_handler))
        .route("/api/movement/jog", post(api::jog_handler))
        .route("/api/movement/home", post(api::home_handler))
        // Camera
        .route("/api/printers/{name}/camera", post(api::camera_handler))
        // Temperature
        .route("/api/temperature-presets", get(api::presets_handler))
        .route("/api/printers/{name}/temperature/open", post(api::open_temperature_handler))
        .route("/api/printers/{name}/temperature", post(api::temperature_handler))
        // Files
        .route("/api/files", get(api::files_handler))
        .route("/api/files", post(api::upload_handler))
        .route("/api/files/upload/open", post(api::open_upload_handler))
        .route("/api/files/send", post(api::send_file_handler))
        .route("/api/files/{name}", delete(api::delete_file_handler))
        // Thumbnails
        .route("/api/printers/{name}/thumbnail", get(api::thumbnail_handler))
        .route("/api/printers/{name}/thumbnail/open", post(api::open_thumbnail_handler))
        .route("/api/blobs/{id}", get(api::blob_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping poller...");
    dashboard.shutdown();
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
