//! Health Check and Metrics Endpoint
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the terminal link and stream tasks
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (last liveness check passed or stream connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::StreamTaskStats;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::terminal::{ConnectionState, StreamStatus};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the last liveness check got a reply.
    pub terminal_reachable: bool,
    /// Push stream status, absent when the stream channel is not used.
    pub stream: Option<StreamInfo>,
    /// Polling task counters.
    pub tasks: TaskInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Terminal reachable and stream (if used) connected.
    Healthy,
    /// Terminal reachable but stream down.
    Degraded,
    /// Terminal unreachable.
    Unhealthy,
}

/// Push stream status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Frames decoded.
    pub frames_received: u64,
    /// Most recent reader error.
    pub last_error: Option<String>,
}

/// Polling task counters.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    /// Tasks running now.
    pub active: usize,
    /// Tasks started.
    pub started: u64,
    /// Tasks stopped.
    pub stopped: u64,
    /// Successful fetches.
    pub ticks: u64,
    /// Failed fetches.
    pub failures: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    terminal_reachable: AtomicBool,
    stream: Option<Arc<StreamStatus>>,
    tasks: Arc<StreamTaskStats>,
}

impl HealthServerState {
    /// Create health state over the stream status and task counters.
    #[must_use]
    pub fn new(
        version: String,
        stream: Option<Arc<StreamStatus>>,
        tasks: Arc<StreamTaskStats>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            terminal_reachable: AtomicBool::new(false),
            stream,
            tasks,
        }
    }

    /// Record the outcome of a liveness check.
    pub fn set_terminal_reachable(&self, reachable: bool) {
        self.terminal_reachable.store(reachable, Ordering::SeqCst);
    }

    /// Outcome of the last liveness check.
    #[must_use]
    pub fn terminal_reachable(&self) -> bool {
        self.terminal_reachable.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let stream_connected = state
        .stream
        .as_ref()
        .is_some_and(|s| s.state() == ConnectionState::Connected);

    if state.terminal_reachable() || stream_connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream = state.stream.as_ref().map(|s| StreamInfo {
        state: s.state(),
        frames_received: s.frames_received(),
        last_error: s.last_error(),
    });
    let terminal_reachable = state.terminal_reachable();

    HealthResponse {
        status: determine_health_status(terminal_reachable, stream.as_ref()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        terminal_reachable,
        stream,
        tasks: TaskInfo {
            active: state.tasks.active(),
            started: state.tasks.started(),
            stopped: state.tasks.stopped(),
            ticks: state.tasks.ticks(),
            failures: state.tasks.failures(),
        },
    }
}

fn determine_health_status(terminal_reachable: bool, stream: Option<&StreamInfo>) -> HealthStatus {
    if !terminal_reachable {
        return HealthStatus::Unhealthy;
    }
    match stream {
        Some(s) if s.state != ConnectionState::Connected => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
