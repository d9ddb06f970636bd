//! `RelayServer`: axum HTTP + WebSocket gateway.
//!
//! Routes:
//! - `GET /v1/ws/{session_id}?token=…` client WebSocket
//! - `POST /v1/bus/{channel}` producer ingress onto the bus
//! - `GET /health`
//! - `GET /metrics` Prometheus text

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use mockpilot_bus::SharedBus;
use mockpilot_core::SessionId;
use mockpilot_settings::MockpilotSettings;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, CredentialVerifier, parse_session_id};
use crate::errors::HubError;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{self, SessionTiming, run_ws_session};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session fan-out hub.
    pub hub: Arc<Hub>,
    /// Bus for producer ingress.
    pub bus: SharedBus,
    /// Handshake credential check.
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Channels producers may publish to over HTTP.
    pub ingress_channels: Arc<HashSet<String>>,
    /// Ping cadence for client connections.
    pub timing: SessionTiming,
    /// Hard ceiling on WebSocket message size.
    pub max_message_bytes: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay's HTTP server.
pub struct RelayServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
    max_frame_bytes: usize,
}

impl RelayServer {
    /// Create a server over an existing hub and bus.
    pub fn new(
        settings: &MockpilotSettings,
        hub: Arc<Hub>,
        bus: SharedBus,
        verifier: Arc<dyn CredentialVerifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let ingress_channels = settings
            .bus
            .channels
            .client_event_channels()
            .into_iter()
            .collect();
        let state = AppState {
            hub,
            bus,
            verifier,
            ingress_channels: Arc::new(ingress_channels),
            timing: SessionTiming {
                ping_interval: settings.server.ping_interval(),
                pong_timeout: settings.server.pong_timeout(),
            },
            max_message_bytes: settings.server.max_frame_bytes.saturating_mul(4),
            start_time: Instant::now(),
            metrics,
        };
        Self {
            state,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            max_frame_bytes: settings.server.max_frame_bytes,
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/v1/ws/{session_id}", get(ws_handler))
            .route(
                "/v1/bus/{channel}",
                post(ingress_handler).layer(DefaultBodyLimit::max(self.max_frame_bytes)),
            )
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind `addr` and serve until the shutdown token is cancelled.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self, addr: &str) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, "relay server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.state.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
        state.hub.session_count(),
        state.hub.longest_quiet(tokio::time::Instant::now()),
        state.hub.is_draining(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// GET /v1/ws/{session_id}
///
/// Always upgrades; a rejected handshake is answered with a close frame
/// whose code says why.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(raw_session): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = query.token.or_else(|| bearer_token(&headers));
    let verdict = authorize(&state, &raw_session, token.as_deref());

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let session_id = match verdict {
                Ok(session_id) => session_id,
                Err(e) => {
                    counter!("ws_handshake_rejected_total", "reason" => e.reason()).increment(1);
                    debug!(error = %e, "handshake refused");
                    session::reject(socket, e.close_code(), e.reason()).await;
                    return;
                }
            };
            match state.hub.attach(session_id) {
                Ok(handle) => {
                    run_ws_session(socket, handle, Arc::clone(&state.hub), state.timing).await;
                }
                Err(HubError::Draining) => {
                    counter!("ws_handshake_rejected_total", "reason" => "draining").increment(1);
                    session::reject(socket, 1012, "server_restart").await;
                }
                Err(e) => {
                    warn!(error = %e, "attach failed");
                    session::reject(socket, 1011, "server_error").await;
                }
            }
        })
}

fn authorize(
    state: &AppState,
    raw_session: &str,
    token: Option<&str>,
) -> Result<SessionId, AuthError> {
    let session_id = parse_session_id(raw_session)?;
    let token = token.ok_or(AuthError::MissingToken)?;
    let _ = state.verifier.verify(&session_id, token)?;
    Ok(session_id)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// POST /v1/bus/{channel}
///
/// Publishes the raw body. Consumers validate it.
async fn ingress_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> Response {
    if !state.ingress_channels.contains(&channel) {
        return error_response(StatusCode::NOT_FOUND, "unknown_channel", &channel);
    }
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_body", "request body is empty");
    }
    match state.bus.publish(&channel, body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) if e.is_connectivity() => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "bus_unavailable", &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "bus_error", &e.to_string()),
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error_code": code, "message": message })),
    )
        .into_response()
}
