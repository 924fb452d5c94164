use super::{fetch_json, join_url, FetchError, Metric, MetricContext, MetricSource};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::error;

const ETCD_INDEX_HEADER: &str = "X-Etcd-Index";
const RAFT_INDEX_HEADER: &str = "X-Raft-Index";
const RAFT_TERM_HEADER: &str = "X-Raft-Term";

/// Fixed names plus the store counters etcd v2 is known to report,
/// already capitalized the way they are emitted.
const STORE_METRIC_NAMES: &[&str] = &[
    "EtcdIndex",
    "RaftIndex",
    "RaftTerm",
    "GetsSuccess",
    "GetsFail",
    "SetsSuccess",
    "SetsFail",
    "DeleteSuccess",
    "DeleteFail",
    "UpdateSuccess",
    "UpdateFail",
    "CreateSuccess",
    "CreateFail",
    "CompareAndSwapSuccess",
    "CompareAndSwapFail",
    "CompareAndDeleteSuccess",
    "CompareAndDeleteFail",
    "ExpireCount",
    "Watchers",
];

/// Store counters from `/v2/stats/store` plus raft position from the
/// response headers of `/v2/keys/`
pub struct StoreStats {
    client: reqwest::Client,
    stats_endpoint: String,
    keys_endpoint: String,
}

impl StoreStats {
    pub fn new(client: reqwest::Client, etcd_url: &str) -> Self {
        Self {
            client,
            stats_endpoint: join_url(etcd_url, "v2/stats/store"),
            keys_endpoint: join_url(etcd_url, "v2/keys/"),
        }
    }

    async fn collect(&self) -> Result<Vec<Metric>, FetchError> {
        let stats: BTreeMap<String, u64> = fetch_json(&self.client, &self.stats_endpoint).await?;

        let keys = self.client.get(&self.keys_endpoint).send().await?;
        let headers = keys.headers();
        let etcd_index = parse_index_header(headers, ETCD_INDEX_HEADER)?;
        let raft_index = parse_index_header(headers, RAFT_INDEX_HEADER)?;
        let raft_term = parse_index_header(headers, RAFT_TERM_HEADER)?;

        let mut metrics = vec![
            Metric::new("EtcdIndex", etcd_index),
            Metric::new("RaftIndex", raft_index),
            Metric::new("RaftTerm", raft_term),
        ];
        metrics.extend(
            stats
                .into_iter()
                .map(|(name, value)| Metric::new(capitalize(&name), value)),
        );

        Ok(metrics)
    }
}

#[async_trait]
impl MetricSource for StoreStats {
    async fn emit(&self) -> MetricContext {
        let mut context = MetricContext::empty("store");

        match self.collect().await {
            Ok(metrics) => context.metrics = metrics,
            Err(e) => {
                error!(endpoint = %self.stats_endpoint, error = %e, "failed to collect store stats");
            }
        }

        context
    }

    fn metric_names(&self) -> &'static [&'static str] {
        STORE_METRIC_NAMES
    }
}

fn parse_index_header(
    headers: &reqwest::header::HeaderMap,
    name: &'static str,
) -> Result<u64, FetchError> {
    let raw = headers
        .get(name)
        .ok_or_else(|| FetchError::Header {
            name,
            reason: "missing".to_string(),
        })?
        .to_str()
        .map_err(|e| FetchError::Header {
            name,
            reason: e.to_string(),
        })?;

    raw.trim().parse::<u64>().map_err(|e| FetchError::Header {
        name,
        reason: e.to_string(),
    })
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
