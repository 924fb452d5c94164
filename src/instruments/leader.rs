use super::{fetch_json, join_url, Metric, MetricContext, MetricSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::error;

#[derive(Debug, Deserialize)]
struct LeaderStatsResponse {
    #[serde(default)]
    followers: BTreeMap<String, FollowerStats>,
}

#[derive(Debug, Deserialize)]
struct FollowerStats {
    latency: LatencyStats,
}

#[derive(Debug, Deserialize)]
struct LatencyStats {
    current: f64,
}

/// Raft follower statistics from `/v2/stats/leader`
///
/// Only the leader answers this endpoint; followers redirect and yield an
/// empty context.
pub struct LeaderStats {
    client: reqwest::Client,
    stats_endpoint: String,
}

impl LeaderStats {
    pub fn new(client: reqwest::Client, etcd_url: &str) -> Self {
        Self {
            client,
            stats_endpoint: join_url(etcd_url, "v2/stats/leader"),
        }
    }
}

#[async_trait]
impl MetricSource for LeaderStats {
    async fn emit(&self) -> MetricContext {
        let mut context = MetricContext::empty("leader");

        let stats: LeaderStatsResponse = match fetch_json(&self.client, &self.stats_endpoint).await
        {
            Ok(stats) => stats,
            Err(e) => {
                error!(endpoint = %self.stats_endpoint, error = %e, "failed to collect leader stats");
                return context;
            }
        };

        context
            .metrics
            .push(Metric::new("Followers", stats.followers.len() as u64));

        for (name, follower) in stats.followers {
            context.metrics.push(
                Metric::new("Latency", follower.latency.current).with_tag("follower", name),
            );
        }

        context
    }

    fn metric_names(&self) -> &'static [&'static str] {
        &["Followers", "Latency"]
    }
}
