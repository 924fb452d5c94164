use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::UdpSocket;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to encode telemetry envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send telemetry to {addr}: {source}")]
    Send {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for derived metric values
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send_value(&self, name: &str, value: f64, unit: &str) -> Result<(), TelemetryError>;
}

/// One value metric as carried to the metron agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMetricEnvelope {
    pub origin: String,
    pub event_type: String,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    pub value_metric: ValueMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

/// Pushes each value as a JSON datagram to a metron agent over UDP
///
/// Fire-and-forget: a datagram that is lost in transit is not detected.
pub struct MetronSink {
    socket: UdpSocket,
    metron_address: String,
    origin: String,
}

impl MetronSink {
    /// Bind an ephemeral local UDP socket for sending to `metron_address`
    pub async fn bind(
        metron_address: impl Into<String>,
        origin: impl Into<String>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            metron_address: metron_address.into(),
            origin: origin.into(),
        })
    }
}

#[async_trait]
impl TelemetrySink for MetronSink {
    async fn send_value(&self, name: &str, value: f64, unit: &str) -> Result<(), TelemetryError> {
        let envelope = ValueMetricEnvelope {
            origin: self.origin.clone(),
            event_type: "ValueMetric".to_string(),
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            value_metric: ValueMetric {
                name: name.to_string(),
                value,
                unit: unit.to_string(),
            },
        };
        let datagram = serde_json::to_vec(&envelope)?;

        self.socket
            .send_to(&datagram, &self.metron_address)
            .await
            .map_err(|source| TelemetryError::Send {
                addr: self.metron_address.clone(),
                source,
            })?;
        Ok(())
    }
}
