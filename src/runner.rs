//! Wires the status component, its etcd sources and collector registration

use crate::component::{Component, ComponentConfig, ComponentError, Credentials};
use crate::health_check::{TcpHealthCheck, DEFAULT_DIAL_TIMEOUT};
use crate::instruments::etcd_sources;
use crate::registrar::{CollectorRegistrar, RegistrarError};
use crate::shutdown::ShutdownSignal;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long a stopping status server may spend draining connections
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Registrar(#[from] RegistrarError),

    #[error("status server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("status server stopped before shutdown was requested")]
    StoppedEarly,
}

/// Settings for one etcd metrics component
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsServerConfig {
    pub job_name: String,
    pub index: u32,
    /// Auto-detected when `None`
    pub address: Option<IpAddr>,
    pub port: u16,
    pub credentials: Credentials,
    pub etcd_url: String,
    /// host:port probed by `/healthz`
    pub etcd_address: String,
}

/// Runs the status component for one etcd node until shutdown
pub struct MetricsServer {
    registrar: CollectorRegistrar,
    client: reqwest::Client,
    config: MetricsServerConfig,
    stop_grace_period: Duration,
}

impl MetricsServer {
    pub fn new(
        registrar: CollectorRegistrar,
        client: reqwest::Client,
        config: MetricsServerConfig,
    ) -> Self {
        Self {
            registrar,
            client,
            config,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }

    /// Bound on draining in-flight requests at shutdown; connections still
    /// open afterwards are abandoned
    pub fn with_stop_grace_period(mut self, grace_period: Duration) -> Self {
        self.stop_grace_period = grace_period;
        self
    }

    /// Component probing the etcd port and serving its leader, server and
    /// store stats
    pub fn build_component(&self) -> Result<Component, ComponentError> {
        let mut component_config = ComponentConfig::new(&self.config.job_name, self.config.index)
            .with_status_port(self.config.port)
            .with_credentials(self.config.credentials.clone());
        if let Some(address) = self.config.address {
            component_config = component_config.with_address(address);
        }

        let health_check = Arc::new(TcpHealthCheck::new(
            self.config.etcd_address.clone(),
            DEFAULT_DIAL_TIMEOUT,
        ));
        let sources = etcd_sources(self.client.clone(), &self.config.etcd_url);

        Component::new(component_config, health_check, sources)
    }

    /// Serve and register, then wait for shutdown
    ///
    /// # Errors
    /// Registration failures stop the status server and are returned. A
    /// status server that exits before shutdown is an error too.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), RunnerError> {
        let component = self.build_component()?;
        info!(
            parent: component.span(),
            addr = %component.status_addr(),
            etcd = %self.config.etcd_url,
            "Starting etcd metrics server"
        );

        let mut serving = tokio::spawn({
            let component = component.clone();
            async move { component.start_monitoring_endpoints().await }
        });

        if let Err(e) = self.registrar.register_with_collector(&component).await {
            error!(parent: component.span(), error = %e, "Failed to register with collector");
            let _ = tokio::time::timeout(
                self.stop_grace_period,
                component.stop_monitoring_endpoints(),
            )
            .await;
            // The server may not have bound yet, so the stop above can miss it
            serving.abort();
            let _ = serving.await;
            return Err(e.into());
        }

        tokio::select! {
            _ = shutdown.wait() => {
                info!(parent: component.span(), "Shutdown requested, stopping status server");
                stop(&component, serving, self.stop_grace_period).await
            }
            result = &mut serving => {
                result??;
                Err(RunnerError::StoppedEarly)
            }
        }
    }
}

/// Stop the status server and join its task within `grace_period`
///
/// A server still draining when the period ends is aborted and counts as
/// stopped.
async fn stop(
    component: &Component,
    mut serving: JoinHandle<Result<(), ComponentError>>,
    grace_period: Duration,
) -> Result<(), RunnerError> {
    let stopped = async {
        component.stop_monitoring_endpoints().await;
        (&mut serving).await
    };

    match tokio::time::timeout(grace_period, stopped).await {
        Ok(joined) => joined
            .map_err(RunnerError::from)
            .and_then(|served| served.map_err(RunnerError::from)),
        Err(_) => {
            warn!(
                parent: component.span(),
                grace_period_secs = grace_period.as_secs_f64(),
                "Status server did not drain in time, aborting"
            );
            serving.abort();
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
