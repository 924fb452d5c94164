//! Metric sources backed by the etcd v2 stats API
//!
//! Each source polls one stats endpoint and turns the response into a
//! [`MetricContext`]. Fetch and decode failures are logged and produce an
//! empty context; callers never see an error from `emit()`.

mod leader;
mod server;
mod store;

pub use leader::LeaderStats;
pub use server::ServerStats;
pub use store::StoreStats;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A single metric value
///
/// Serializes as a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Unsigned(u64),
    Signed(i64),
}

impl MetricValue {
    /// Lossy conversion used when forwarding to telemetry
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Float(v) => v,
            MetricValue::Unsigned(v) => v as f64,
            MetricValue::Signed(v) => v as f64,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Unsigned(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Signed(v)
    }
}

/// A named metric with optional tags
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// The metrics one source produced in one emission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricContext {
    pub name: String,
    pub metrics: Vec<Metric>,
}

impl MetricContext {
    /// A context with no metrics, as returned on any upstream failure
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: Vec::new(),
        }
    }
}

/// Capability: produce a named set of metrics on demand
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Collect the current metrics. Never fails; upstream errors yield an
    /// empty context.
    async fn emit(&self) -> MetricContext;

    /// Metric names this source can produce with a fixed name
    ///
    /// Used to validate the unit table at startup. Sources producing
    /// dynamic names list only the ones they know about.
    fn metric_names(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Build the HTTP client shared by the etcd sources
///
/// Redirects are disabled: a follower redirects stats requests to the
/// leader, and those must not be attributed to this node.
pub fn stats_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// The fixed ordered set of sources for one etcd endpoint
pub fn etcd_sources(client: reqwest::Client, etcd_url: &str) -> Vec<Arc<dyn MetricSource>> {
    vec![
        Arc::new(LeaderStats::new(client.clone(), etcd_url)),
        Arc::new(ServerStats::new(client.clone(), etcd_url)),
        Arc::new(StoreStats::new(client, etcd_url)),
    ]
}

/// Join path segments onto a base URL without doubling slashes
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Failure while fetching or decoding upstream stats
#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("redirected to leader")]
    Redirected,

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed header {name}: {reason}")]
    Header { name: &'static str, reason: String },
}

/// GET `url` and decode the JSON body, rejecting redirects and error statuses
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.is_redirection() {
        return Err(FetchError::Redirected);
    }
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
#[path = "instruments_test.rs"]
mod tests;
