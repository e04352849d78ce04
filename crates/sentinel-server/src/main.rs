//! Sentinel - Home automation hub server

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use hub_core::LeafConnections;
use leaf_protocol::HubId;
use rule_engine::{AutomationEngine, AutomationEvent, EngineConfig};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod websocket;

use config::ServerConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutomationEngine>,
    pub connections: Arc<LeafConnections>,
}

/// WebSocket upgrade handler for leaf sessions
async fn hub_handler(
    ws: WebSocketUpgrade,
    Path(hub_id): Path<u64>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, HubId(hub_id), state))
}

/// Health check
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "hubs": state.engine.hub_ids().len(),
    }))
}

/// Log engine events until the engine goes away
fn spawn_event_logger(engine: &AutomationEngine) {
    let mut event_rx = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(AutomationEvent::StateChanged { hub_id, slot }) => {
                    tracing::trace!("Hub {}: {} changed", hub_id, slot);
                }
                Ok(event) => tracing::debug!("Engine event: {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sentinel_server=debug,rule_engine=debug,hub_core=debug,tower_http=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Sentinel hub server");

    let config = ServerConfig::from_env()?;
    tracing::info!("Data directory: {:?}", config.data_dir);

    let connections = Arc::new(LeafConnections::new(config.outbound_buffer));
    let engine = Arc::new(AutomationEngine::new(
        connections.clone(),
        EngineConfig {
            data_dir: Some(config.data_dir.clone()),
            max_cascade_depth: config.max_cascade_depth,
        },
    ));

    let loaded = engine.load().await?;
    tracing::info!("Loaded {} hubs", loaded);
    spawn_event_logger(&engine);

    let state = AppState {
        engine,
        connections,
    };

    // Build the router
    let app = Router::new()
        .route("/health", get(health))
        .route("/hub/:hub_id", get(hub_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("Listening on {}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
