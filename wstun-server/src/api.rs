//! HTTP surface
//!
//! | Path | Auth | Response |
//! |---|---|---|
//! | `GET /` | none | `{"timestamp": <unix-seconds>}` |
//! | `GET /config` | key | tunnel settings clients must match |
//! | `POST /allocator/register` | key | `{"server": ip, "client": cidr}` |
//! | `GET /stats` | key | plain-text byte counters |
//! | `GET /ws` | key | WebSocket tunnel |
//!
//! Authentication compares the `key` request header with the configured
//! secret; with no secret configured every request passes.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use wstun_core::{Allocator, Relay};

use crate::config::ServerConfig;
use crate::ws;

/// Header carrying the shared secret
pub const KEY_HEADER: &str = "key";

/// Interface failures reported by connection tasks
pub type FatalReceiver = mpsc::UnboundedReceiver<wstun_core::Error>;

/// Tunnel parameters clients must configure to match the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSettings {
    pub buffer_size: usize,
    pub mtu: u16,
    pub compress: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub(crate) key: Option<Arc<str>>,
    pub(crate) tunnel: TunnelSettings,
    pub(crate) allocator: Arc<Allocator>,
    pub(crate) relay: Relay,
    pub(crate) peer_queue: usize,
    pub(crate) fatal: mpsc::UnboundedSender<wstun_core::Error>,
}

impl AppState {
    /// Build handler state, returning the receiver for fatal interface errors
    pub fn new(
        config: &ServerConfig,
        allocator: Arc<Allocator>,
        relay: Relay,
    ) -> (Self, FatalReceiver) {
        let (fatal, fatal_rx) = mpsc::unbounded_channel();
        let state = Self {
            key: config.key().map(Arc::from),
            tunnel: TunnelSettings {
                buffer_size: config.buffer_size,
                mtu: config.mtu,
                compress: config.compress,
            },
            allocator,
            relay,
            peer_queue: config.peer_queue,
            fatal,
        };
        (state, fatal_rx)
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(ref key) = self.key else {
            return true;
        };
        headers
            .get(KEY_HEADER)
            .is_some_and(|value| value.as_bytes() == key.as_bytes())
    }
}

/// Request body of `/allocator/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
}

/// Response body of `/allocator/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub server: String,
    pub client: String,
}

/// Response body of `/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampResponse {
    pub timestamp: u64,
}

/// Error body of every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn not_permitted() -> Self {
        Self::new("not permitted")
    }
}

/// Convert an allocator error to an API response
fn error_response(err: wstun_core::Error) -> (StatusCode, Json<ApiError>) {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ApiError::new(err.to_string())))
}

/// Create the router with all routes
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/config", get(tunnel_config))
        .route("/allocator/register", post(register_device))
        .route("/stats", get(stats))
        .route("/ws", get(websocket))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_key));

    Router::new()
        .route("/", get(timestamp))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn require_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.is_authorized(request.headers()) {
        log::debug!("Rejected unauthorized request to {}", request.uri().path());
        return (StatusCode::FORBIDDEN, Json(ApiError::not_permitted())).into_response();
    }
    next.run(request).await
}

async fn timestamp() -> Json<TimestampResponse> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Json(TimestampResponse { timestamp })
}

async fn tunnel_config(State(state): State<AppState>) -> Json<TunnelSettings> {
    Json(state.tunnel)
}

async fn register_device(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ApiError::new(e.to_string()))).into_response();
        }
    };

    // Registration writes the lease store synchronously
    let allocator = state.allocator.clone();
    let result = tokio::task::spawn_blocking(move || allocator.register(&request.id)).await;

    match result {
        Ok(Ok(lease)) => Json(RegisterResponse {
            server: lease.server.to_string(),
            client: lease.client_cidr(),
        })
        .into_response(),
        Ok(Err(e)) => {
            log::warn!("Registration failed: {}", e);
            error_response(e).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("registration task failed: {}", e))),
        )
            .into_response(),
    }
}

async fn stats(State(state): State<AppState>) -> String {
    state.relay.counters().snapshot().render()
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}
