//! Periodic forwarding of etcd metrics to telemetry
//!
//! Every report interval the notifier asks each source for a fresh
//! [`MetricContext`](crate::instruments::MetricContext) and pushes every
//! metric to a [`TelemetrySink`] together with its unit.

mod sink;
mod units;

pub use sink::{MetronSink, TelemetryError, TelemetrySink, ValueMetric, ValueMetricEnvelope};
pub use units::metric_unit;

use crate::instruments::{etcd_sources, MetricSource};
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("no telemetry unit known for metric {0}")]
    UnknownMetricUnit(String),

    #[error("report interval must be greater than zero")]
    ZeroInterval,
}

/// Forwards source metrics to a telemetry sink on a fixed interval
pub struct PeriodicNotifier {
    sources: Vec<Arc<dyn MetricSource>>,
    sink: Arc<dyn TelemetrySink>,
    interval: Duration,
}

impl PeriodicNotifier {
    /// Create a notifier, checking that every declared metric has a unit
    pub fn new(
        sources: Vec<Arc<dyn MetricSource>>,
        sink: Arc<dyn TelemetrySink>,
        interval: Duration,
    ) -> Result<Self, NotifierError> {
        if interval.is_zero() {
            return Err(NotifierError::ZeroInterval);
        }

        let missing = sources
            .iter()
            .flat_map(|source| source.metric_names().iter())
            .find(|name| metric_unit(name).is_none());
        if let Some(name) = missing {
            return Err(NotifierError::UnknownMetricUnit(name.to_string()));
        }

        Ok(Self {
            sources,
            sink,
            interval,
        })
    }

    /// Notifier over the leader, server and store stats of one etcd node
    pub fn for_endpoint(
        etcd_url: &str,
        client: reqwest::Client,
        sink: Arc<dyn TelemetrySink>,
        interval: Duration,
    ) -> Result<Self, NotifierError> {
        Self::new(etcd_sources(client, etcd_url), sink, interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Report on every tick until shutdown is requested
    ///
    /// The first report happens one interval after the call. Shutdown is
    /// only observed between reports.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), NotifierError> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs_f64(),
            sources = self.sources.len(),
            "Starting periodic metrics notifier"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    info!("Shutdown signal received, stopping metrics notifier");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    self.report().await;
                }
            }
        }
    }

    /// Emit every source once and forward the results
    pub async fn report(&self) {
        for source in &self.sources {
            let context = source.emit().await;
            debug!(
                context = %context.name,
                metrics = context.metrics.len(),
                "Forwarding metric context"
            );

            for metric in &context.metrics {
                let Some(unit) = metric_unit(&metric.name) else {
                    warn!(
                        context = %context.name,
                        metric = %metric.name,
                        "Skipping metric with no known unit"
                    );
                    continue;
                };

                if let Err(e) = self
                    .sink
                    .send_value(&metric.name, metric.value.as_f64(), unit)
                    .await
                {
                    warn!(metric = %metric.name, error = %e, "Failed to send metric");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "notifier_test.rs"]
mod tests;
