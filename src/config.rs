//! Command-line and environment configuration

use crate::component::Credentials;
use crate::runner::MetricsServerConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("etcd address must be set")]
    MissingEtcdAddress,

    #[error("at least one NATS address must be set")]
    MissingNatsAddresses,

    #[error("report interval must be greater than zero")]
    ZeroReportInterval,

    #[error("communication timeout must be greater than zero")]
    ZeroCommunicationTimeout,
}

/// Serves etcd metrics over /varz and forwards them to telemetry
#[derive(Parser, Debug, Clone)]
#[command(name = "etcd-metrics-server", version, about, long_about = None)]
pub struct Config {
    /// Component name announced to the collector
    #[arg(long, default_value = "etcd", env = "ETCD_METRICS_JOB_NAME")]
    pub job_name: String,

    /// Scheme used to reach etcd
    #[arg(long, default_value = "http", env = "ETCD_METRICS_ETCD_SCHEME")]
    pub etcd_scheme: String,

    /// etcd host:port
    #[arg(long, default_value = "127.0.0.1:4001", env = "ETCD_METRICS_ETCD_ADDRESS")]
    pub etcd_address: String,

    /// Instance index of this job
    #[arg(long, default_value_t = 0, env = "ETCD_METRICS_INDEX")]
    pub index: u32,

    /// Status server port
    #[arg(long, default_value_t = 5678, env = "ETCD_METRICS_PORT")]
    pub port: u16,

    /// /varz username (generated when empty)
    #[arg(long, default_value = "", env = "ETCD_METRICS_USERNAME")]
    pub username: String,

    /// /varz password (generated when empty)
    #[arg(long, default_value = "", env = "ETCD_METRICS_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Comma separated NATS host:port list
    #[arg(long, default_value = "127.0.0.1:4222", env = "ETCD_METRICS_NATS_ADDRESSES")]
    pub nats_addresses: String,

    #[arg(long, default_value = "nats", env = "ETCD_METRICS_NATS_USERNAME")]
    pub nats_username: String,

    #[arg(
        long,
        default_value = "nats",
        env = "ETCD_METRICS_NATS_PASSWORD",
        hide_env_values = true
    )]
    pub nats_password: String,

    /// host:port of the metron agent
    #[arg(long, default_value = "127.0.0.1:3457", env = "ETCD_METRICS_METRON_ADDRESS")]
    pub metron_address: String,

    /// Timeout for requests to etcd, in seconds
    #[arg(long, default_value_t = 30, env = "ETCD_METRICS_COMMUNICATION_TIMEOUT")]
    pub communication_timeout: u64,

    /// Seconds between telemetry reports
    #[arg(long, default_value_t = 60, env = "ETCD_METRICS_REPORT_INTERVAL")]
    pub report_interval: u64,

    /// host:port for the log-level debug server; disabled when unset
    #[arg(long, env = "ETCD_METRICS_DEBUG_ADDRESS")]
    pub debug_address: Option<SocketAddr>,
}

impl Config {
    /// Check that every required setting is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.etcd_address.trim().is_empty() {
            return Err(ConfigError::MissingEtcdAddress);
        }
        if self.nats_addresses().is_empty() {
            return Err(ConfigError::MissingNatsAddresses);
        }
        if self.report_interval == 0 {
            return Err(ConfigError::ZeroReportInterval);
        }
        if self.communication_timeout == 0 {
            return Err(ConfigError::ZeroCommunicationTimeout);
        }
        Ok(())
    }

    /// Base URL of the etcd node, e.g. `http://127.0.0.1:4001`
    pub fn etcd_url(&self) -> String {
        format!("{}://{}", self.etcd_scheme, self.etcd_address.trim())
    }

    /// NATS addresses with blanks dropped
    pub fn nats_addresses(&self) -> Vec<String> {
        self.nats_addresses
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn communication_timeout(&self) -> Duration {
        Duration::from_secs(self.communication_timeout)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    /// Name used for this process in logs and telemetry origin
    pub fn log_name(&self) -> String {
        format!("{}-metrics-server", self.job_name)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// Settings for the status server runner
    pub fn server_config(&self) -> MetricsServerConfig {
        MetricsServerConfig {
            job_name: self.job_name.clone(),
            index: self.index,
            address: None,
            port: self.port,
            credentials: self.credentials(),
            etcd_url: self.etcd_url(),
            etcd_address: self.etcd_address.trim().to_string(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
