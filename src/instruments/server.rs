use super::{fetch_json, join_url, Metric, MetricContext, MetricSource};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

/// Subset of etcd's `/v2/stats/self` payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerStatsResponse {
    #[serde(default)]
    state: String,
    #[serde(default)]
    recv_append_request_cnt: u64,
    #[serde(default)]
    recv_pkg_rate: f64,
    #[serde(default)]
    recv_bandwidth_rate: f64,
    #[serde(default)]
    send_append_request_cnt: u64,
    #[serde(default)]
    send_pkg_rate: f64,
    #[serde(default)]
    send_bandwidth_rate: f64,
}

impl ServerStatsResponse {
    // etcd 2.x reports "StateLeader", older builds plain "leader"
    fn is_leader(&self) -> bool {
        matches!(self.state.as_str(), "StateLeader" | "leader")
    }
}

/// Raft server statistics from `/v2/stats/self`
pub struct ServerStats {
    client: reqwest::Client,
    stats_endpoint: String,
}

impl ServerStats {
    pub fn new(client: reqwest::Client, etcd_url: &str) -> Self {
        Self {
            client,
            stats_endpoint: join_url(etcd_url, "v2/stats/self"),
        }
    }
}

#[async_trait]
impl MetricSource for ServerStats {
    async fn emit(&self) -> MetricContext {
        let mut context = MetricContext::empty("server");

        let stats: ServerStatsResponse = match fetch_json(&self.client, &self.stats_endpoint).await
        {
            Ok(stats) => stats,
            Err(e) => {
                error!(endpoint = %self.stats_endpoint, error = %e, "failed to collect self stats");
                return context;
            }
        };

        let is_leader: i64 = if stats.is_leader() { 1 } else { 0 };

        context.metrics = vec![
            Metric::new("IsLeader", is_leader),
            Metric::new("SendingBandwidthRate", stats.send_bandwidth_rate),
            Metric::new("ReceivingBandwidthRate", stats.recv_bandwidth_rate),
            Metric::new("SendingRequestRate", stats.send_pkg_rate),
            Metric::new("ReceivingRequestRate", stats.recv_pkg_rate),
            Metric::new("SentAppendRequests", stats.send_append_request_cnt),
            Metric::new("ReceivedAppendRequests", stats.recv_append_request_cnt),
        ];

        context
    }

    fn metric_names(&self) -> &'static [&'static str] {
        &[
            "IsLeader",
            "SendingBandwidthRate",
            "ReceivingBandwidthRate",
            "SendingRequestRate",
            "ReceivingRequestRate",
            "SentAppendRequests",
            "ReceivedAppendRequests",
        ]
    }
}
