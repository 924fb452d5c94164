//! Optional debug endpoint for changing the log filter at runtime
//!
//! - `GET /log-level` - The active filter directives
//! - `PUT|POST /log-level` - Replace the filter with the directives in the
//!   body, e.g. `debug` or `info,etcd_metrics_server=trace`

use crate::shutdown::ShutdownSignal;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Reload handle for the filter layer installed on the global registry
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Error)]
pub enum DebugServerError {
    /// The debug address is taken or not local
    #[error("failed to bind debug server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server failed after binding
    #[error("debug server failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LogLevelError {
    #[error("no filter directives given")]
    Empty,

    #[error("invalid filter directives: {0}")]
    Invalid(#[from] tracing_subscriber::filter::ParseError),

    /// The subscriber owning the filter has been dropped
    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Reads and replaces the process log filter
#[derive(Clone)]
pub struct LogLevel {
    handle: FilterHandle,
}

impl LogLevel {
    pub fn new(handle: FilterHandle) -> Self {
        Self { handle }
    }

    /// Active filter directives
    pub fn current(&self) -> Result<String, LogLevelError> {
        Ok(self.handle.with_current(|filter| filter.to_string())?)
    }

    /// Parse `directives` and swap them in; the old filter stays on error
    pub fn set(&self, directives: &str) -> Result<String, LogLevelError> {
        let directives = directives.trim();
        if directives.is_empty() {
            return Err(LogLevelError::Empty);
        }

        let filter = EnvFilter::try_new(directives)?;
        self.handle.reload(filter)?;
        self.current()
    }
}

/// Debug HTTP server bound to its address
pub struct DebugServer {
    listener: TcpListener,
    log_level: LogLevel,
}

impl DebugServer {
    /// Bind now so a bad address fails at startup
    pub async fn bind(addr: SocketAddr, log_level: LogLevel) -> Result<Self, DebugServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DebugServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            log_level,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown is requested
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), DebugServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "Debug server listening");
        }

        axum::serve(self.listener, router(self.log_level))
            .with_graceful_shutdown(shutdown.wait_owned())
            .await
            .map_err(DebugServerError::Serve)
    }
}

/// Build the debug router
pub fn router(log_level: LogLevel) -> Router {
    Router::new()
        .route(
            "/log-level",
            get(get_log_level).put(set_log_level).post(set_log_level),
        )
        .with_state(log_level)
}

/// 200 with the active directives
async fn get_log_level(State(log_level): State<LogLevel>) -> Response {
    match log_level.current() {
        Ok(current) => (StatusCode::OK, current).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// 200 with the new directives, 400 if they don't parse
async fn set_log_level(State(log_level): State<LogLevel>, body: String) -> Response {
    match log_level.set(&body) {
        Ok(current) => {
            info!(filter = %current, "Log filter changed");
            (StatusCode::OK, current).into_response()
        }
        Err(e @ (LogLevelError::Empty | LogLevelError::Invalid(_))) => {
            warn!(error = %e, "Rejected log filter change");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
#[path = "debug_server_test.rs"]
mod tests;
