//! Liveness checks for the instrumented process
//!
//! `/healthz` reports whatever the component's [`HealthCheck`] says. The
//! TCP check dials the upstream and hangs up; reachability is all it tests.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::error;

/// Default dial timeout for [`TcpHealthCheck`]
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Capability: report boolean liveness
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ok(&self) -> bool;
}

/// Healthy when a TCP connection to `addr` can be opened within the timeout
#[derive(Debug, Clone)]
pub struct TcpHealthCheck {
    addr: String,
    timeout: Duration,
}

impl TcpHealthCheck {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for TcpHealthCheck {
    async fn ok(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            Ok(Err(e)) => {
                error!(addr = %self.addr, error = %e, "health check failed");
                false
            }
            Err(_) => {
                error!(addr = %self.addr, timeout = ?self.timeout, "health check timed out");
                false
            }
        }
    }
}

/// Always reports healthy
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AlwaysHealthy;

#[cfg(test)]
#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn ok(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "health_check_test.rs"]
mod tests;
