use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::automation::Automation;
use crate::automation::AutomationError;
use crate::config::HubConfig;
use crate::dispatch::Scene;
use crate::engine::Engine;
use crate::hub;
use crate::store::Device;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct DevicesResponse {
    devices: Vec<Device>,
}

#[derive(Serialize)]
struct ScenesResponse {
    scenes: Vec<Scene>,
}

#[derive(Serialize)]
struct AutomationsResponse {
    automations: Vec<Automation>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn accepted() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(PingResponse {
            status: "accepted".to_string(),
        }),
    )
        .into_response()
}

fn not_found(error: String) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error })).into_response()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
    hub_config: HubConfig,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, hub_config: HubConfig) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            engine,
            hub_config,
        }
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/devices
#[tracing::instrument(skip(state))]
async fn devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.engine.devices();
    tracing::debug!("Listing {} devices", devices.len());
    (StatusCode::OK, Json(DevicesResponse { devices }))
}

/// Handler for DELETE /v1/devices/:name
#[tracing::instrument(skip(state))]
async fn remove_device(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.engine.remove_device(&name) {
        Some(device) => (StatusCode::OK, Json(device)).into_response(),
        None => not_found(format!("Unknown device: {}", name)),
    }
}

/// Handler for POST /v1/devices/:name/refresh
#[tracing::instrument(skip(state))]
async fn refresh_device(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if !state.engine.device_store().contains(&name) {
        return not_found(format!("Unknown device: {}", name));
    }
    state.engine.refresh_device(&name);
    accepted()
}

/// Handler for GET /v1/scenes
#[tracing::instrument(skip(state))]
async fn scenes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scenes = state.engine.scenes().list();
    (StatusCode::OK, Json(ScenesResponse { scenes }))
}

/// Handler for GET /v1/automations
#[tracing::instrument(skip(state))]
async fn automations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let automations = state.engine.automations().list();
    (StatusCode::OK, Json(AutomationsResponse { automations }))
}

/// Handler for POST /v1/automations/:id/run
#[tracing::instrument(skip(state))]
async fn run_automation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.engine.run_automation(&id) {
        Ok(()) => accepted(),
        Err(e @ AutomationError::NotFound(_)) => not_found(e.to_string()),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Handler for POST /v1/bridge/permit_join
#[tracing::instrument(skip(state))]
async fn permit_join(State(state): State<Arc<AppState>>) -> Response {
    state.engine.permit_join();
    accepted()
}

/// Handler for POST /v1/bridge/restart
#[tracing::instrument(skip(state))]
async fn restart_bridge(State(state): State<Arc<AppState>>) -> Response {
    state.engine.restart_bridge();
    accepted()
}

/// Handler for GET /ws
#[tracing::instrument(skip(state, ws))]
async fn ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.engine.hub().clone();
    let config = state.hub_config;
    ws.on_upgrade(move |socket| hub::run_session(socket, hub, config))
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/devices", get(devices))
        .route("/v1/devices/:name", delete(remove_device))
        .route("/v1/devices/:name/refresh", post(refresh_device))
        .route("/v1/scenes", get(scenes))
        .route("/v1/automations", get(automations))
        .route("/v1/automations/:id/run", post(run_automation))
        .route("/v1/bridge/permit_join", post(permit_join))
        .route("/v1/bridge/restart", post(restart_bridge))
        .route("/ws", get(ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Runs until `shutdown_rx` fires, then drains in-flight requests.
pub async fn serve(
    listen: &str,
    port: u16,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
