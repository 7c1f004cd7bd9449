use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use huddle_server::chat::{events, ChatGateway};
use huddle_server::config::{generate_config_template, Config};
use huddle_server::db::{self, SqliteStore};
use huddle_server::hub::Hub;
use huddle_server::{auth, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huddle_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Huddle server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let store = Arc::new(SqliteStore::new(db));

    // Spawn the hub loop; it owns registration and shutdown
    let (hub, hub_handle) = Hub::spawn();

    let gateway = ChatGateway::new(store.clone(), store.clone(), store, hub.clone())
        .with_max_message_len(config.max_message_len);

    let app_state = state::AppState {
        hub: hub.clone(),
        gateway,
        jwt_secret,
        outbound_capacity: config.outbound_capacity,
        ws: config.ws.clone(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(hub))
    .await?;

    if let Err(e) = hub_handle.await {
        tracing::error!(error = %e, "Hub loop ended abnormally");
    }

    tracing::info!("Huddle server stopped");
    Ok(())
}

/// Wait for Ctrl-C, tell connected clients, then stop the hub so every
/// connection actor unwinds before the listener closes.
async fn shutdown_signal(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received");
    if let Err(e) = hub.broadcast(events::server_shutdown()) {
        tracing::warn!(error = %e, "Shutdown notice not sent");
    }
    hub.stop().await;
}
