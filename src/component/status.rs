//! Status endpoints for collectors and probes
//!
//! - `/healthz` - Liveness: does the health check pass? No auth.
//! - `/varz` - Instrumentation: process stats plus every metric source,
//!   behind Basic auth.

use super::auth::BasicAuthGate;
use super::Credentials;
use crate::health_check::HealthCheck;
use crate::instruments::{MetricContext, MetricSource};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use sysinfo::System;
use tracing::error;

/// Realm presented in the `/varz` Basic auth challenge
pub const REALM: &str = "Realm";

/// Read-only state shared by all status handlers
pub(crate) struct StatusState {
    /// Component type reported as `name` in `/varz`
    pub name: String,
    /// Static tags reported in `/varz`
    pub tags: BTreeMap<String, String>,
    /// Backs `/healthz`
    pub health_check: Arc<dyn HealthCheck>,
    /// Emitted in order on every `/varz` request
    pub sources: Vec<Arc<dyn MetricSource>>,
}

/// Process memory as seen by the OS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Resident set size in bytes
    pub resident_bytes: u64,
    /// Virtual memory size in bytes
    pub virtual_bytes: u64,
}

/// Body of a successful `/varz` response
#[derive(Debug, Clone, Serialize)]
pub struct VarzMessage {
    pub name: String,
    #[serde(rename = "numCPUS")]
    pub num_cpus: usize,
    /// Live tokio tasks; the key name is what collectors expect
    #[serde(rename = "numGoRoutines")]
    pub num_tasks: usize,
    #[serde(rename = "memoryStats")]
    pub memory_stats: MemoryStats,
    pub tags: BTreeMap<String, String>,
    pub contexts: Vec<MetricContext>,
}

impl VarzMessage {
    /// Snapshot process stats and emit every source, keeping source order
    pub async fn collect(
        name: &str,
        tags: &BTreeMap<String, String>,
        sources: &[Arc<dyn MetricSource>],
    ) -> Self {
        let contexts = join_all(sources.iter().map(|source| source.emit())).await;

        Self {
            name: name.to_string(),
            num_cpus: num_cpus(),
            num_tasks: num_tasks(),
            memory_stats: memory_stats(),
            tags: tags.clone(),
            contexts,
        }
    }
}

/// Build the status router: `/healthz` open, `/varz` behind Basic auth
pub(crate) fn router(state: Arc<StatusState>, credentials: Credentials) -> Router {
    let varz_routes = BasicAuthGate::new(REALM, credentials)
        .wrap(Router::new().route("/varz", get(varz)));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(varz_routes)
        .with_state(state)
}

/// Always 200; the body says whether the health check passed
async fn healthz(State(state): State<Arc<StatusState>>) -> Response {
    let body = if state.health_check.ok().await {
        "ok"
    } else {
        "bad"
    };

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Collect every source and reply with the `VarzMessage`
async fn varz(State(state): State<Arc<StatusState>>) -> Response {
    let message = VarzMessage::collect(&state.name, &state.tags, &state.sources).await;
    json_response(&message)
}

/// 200 `application/json`, or 500 carrying the encoder's error text
pub(super) fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode varz message");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Logical CPUs available to this process, at least 1
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Tasks alive on the current tokio runtime; 0 outside a runtime
fn num_tasks() -> usize {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks())
        .unwrap_or(0)
}

/// Resident and virtual size of this process
///
/// Zeroes when the process can't be inspected.
fn memory_stats() -> MemoryStats {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return MemoryStats::default();
    };

    let mut system = System::new();
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| MemoryStats {
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        })
        .unwrap_or_default()
}
