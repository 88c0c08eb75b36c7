//! Control-Plane API Service
//!
//! The HTTP endpoint every agent exposes for its peers: liveness, role
//! readiness, and the named state slots used for workload rendezvous. Backed
//! by an in-memory store; state does not outlive the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// In-memory control-plane service. Cheap to clone; all clones share the
/// same state store.
#[derive(Clone, Default)]
pub struct ApiService {
    states: Arc<DashMap<String, serde_json::Value>>,
    online: Arc<AtomicBool>,
}

impl ApiService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the role-specific service ready (or not) to accept work. The
    /// heartbeat route answers regardless; this flag drives `/serverstatus`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Build the router exposing the control-plane routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/heartbeat", get(get_heartbeat))
            .route("/serverstatus", get(get_server_status))
            .route("/state/:id", get(get_state).put(put_state))
            .with_state(self.clone())
    }

    /// Serve until the cancellation token fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(address = %addr, "Control-plane API service listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}

async fn get_heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn get_server_status(State(service): State<ApiService>) -> StatusCode {
    if service.online.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_state(State(service): State<ApiService>, Path(id): Path<String>) -> Response {
    match service.states.get(&id) {
        Some(state) => (StatusCode::OK, Json(state.value().clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_state(
    State(service): State<ApiService>,
    Path(id): Path<String>,
    Json(state): Json<serde_json::Value>,
) -> StatusCode {
    service.states.insert(id, state);
    StatusCode::OK
}
