//! Tests for the periodic notifier and metron sink

use super::*;
use crate::instruments::{stats_client, Metric, MetricContext};
use crate::shutdown;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, f64, String)>>,
    fail_for: Option<&'static str>,
}

impl RecordingSink {
    fn failing_for(name: &'static str) -> Self {
        Self {
            sent: Mutex::default(),
            fail_for: Some(name),
        }
    }

    fn sent(&self) -> Vec<(String, f64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send_value(&self, name: &str, value: f64, unit: &str) -> Result<(), TelemetryError> {
        if self.fail_for == Some(name) {
            return Err(TelemetryError::Send {
                addr: "metron".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((name.to_string(), value, unit.to_string()));
        Ok(())
    }
}

struct StaticSource {
    context: MetricContext,
    names: &'static [&'static str],
}

#[async_trait]
impl MetricSource for StaticSource {
    async fn emit(&self) -> MetricContext {
        self.context.clone()
    }

    fn metric_names(&self) -> &'static [&'static str] {
        self.names
    }
}

fn leader_source() -> Arc<dyn MetricSource> {
    Arc::new(StaticSource {
        context: MetricContext {
            name: "leader".to_string(),
            metrics: vec![
                Metric::new("Followers", 2u64),
                Metric::new("Latency", 1.5).with_tag("follower", "node-1"),
            ],
        },
        names: &["Followers", "Latency"],
    })
}

#[test]
fn test_rejects_declared_metric_without_unit() {
    let source: Arc<dyn MetricSource> = Arc::new(StaticSource {
        context: MetricContext::empty("custom"),
        names: &["Followers", "Mystery"],
    });

    let err = PeriodicNotifier::new(
        vec![source],
        Arc::new(RecordingSink::default()),
        Duration::from_secs(1),
    )
    .err()
    .expect("unknown unit should be rejected");

    assert!(matches!(err, NotifierError::UnknownMetricUnit(ref name) if name == "Mystery"));
}

#[test]
fn test_rejects_zero_interval() {
    let err = PeriodicNotifier::new(
        vec![leader_source()],
        Arc::new(RecordingSink::default()),
        Duration::ZERO,
    )
    .err()
    .expect("zero interval should be rejected");

    assert!(matches!(err, NotifierError::ZeroInterval));
}

#[test]
fn test_etcd_endpoint_notifier_is_valid() {
    let client = stats_client(Duration::from_secs(1)).expect("client");

    let notifier = PeriodicNotifier::for_endpoint(
        "http://127.0.0.1:4001",
        client,
        Arc::new(RecordingSink::default()),
        Duration::from_secs(60),
    )
    .expect("every etcd metric has a unit");

    assert_eq!(notifier.interval(), Duration::from_secs(60));
}

#[tokio::test]
async fn test_report_forwards_values_with_units() {
    let sink = Arc::new(RecordingSink::default());
    let server: Arc<dyn MetricSource> = Arc::new(StaticSource {
        context: MetricContext {
            name: "server".to_string(),
            metrics: vec![Metric::new("IsLeader", 1i64)],
        },
        names: &["IsLeader"],
    });
    let notifier = PeriodicNotifier::new(
        vec![leader_source(), server],
        sink.clone(),
        Duration::from_secs(1),
    )
    .expect("notifier");

    notifier.report().await;

    assert_eq!(
        sink.sent(),
        vec![
            ("Followers".to_string(), 2.0, "Count".to_string()),
            ("Latency".to_string(), 1.5, "ms".to_string()),
            ("IsLeader".to_string(), 1.0, "Bool".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_report_skips_metrics_without_unit() {
    let sink = Arc::new(RecordingSink::default());
    let store: Arc<dyn MetricSource> = Arc::new(StaticSource {
        context: MetricContext {
            name: "store".to_string(),
            metrics: vec![
                Metric::new("BrandNewCounter", 3u64),
                Metric::new("Watchers", 4u64),
            ],
        },
        names: &["Watchers"],
    });
    let notifier =
        PeriodicNotifier::new(vec![store], sink.clone(), Duration::from_secs(1)).expect("notifier");

    notifier.report().await;

    assert_eq!(
        sink.sent(),
        vec![("Watchers".to_string(), 4.0, "Count".to_string())]
    );
}

#[tokio::test]
async fn test_report_continues_after_sink_failure() {
    let sink = Arc::new(RecordingSink::failing_for("Followers"));
    let notifier = PeriodicNotifier::new(vec![leader_source()], sink.clone(), Duration::from_secs(1))
        .expect("notifier");

    notifier.report().await;

    assert_eq!(
        sink.sent(),
        vec![("Latency".to_string(), 1.5, "ms".to_string())]
    );
}

#[tokio::test]
async fn test_unreachable_etcd_forwards_nothing() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let closed = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let sink = Arc::new(RecordingSink::default());
    let client = stats_client(Duration::from_secs(1)).expect("client");
    let notifier =
        PeriodicNotifier::for_endpoint(&closed, client, sink.clone(), Duration::from_secs(1))
            .expect("notifier");

    notifier.report().await;

    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_first_report_waits_one_interval() {
    let sink = Arc::new(RecordingSink::default());
    let notifier =
        PeriodicNotifier::new(vec![leader_source()], sink.clone(), Duration::from_millis(300))
            .expect("notifier");
    let (trigger, signal) = shutdown::channel();

    let task = tokio::spawn(notifier.run(signal));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sink.sent().is_empty(), "no report before the first interval");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!sink.sent().is_empty(), "report after the first interval");

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("notifier should stop")
        .expect("no panic")
        .expect("clean shutdown");
}

#[tokio::test]
async fn test_run_returns_ok_on_shutdown() {
    let sink = Arc::new(RecordingSink::default());
    let notifier =
        PeriodicNotifier::new(vec![leader_source()], sink.clone(), Duration::from_secs(60))
            .expect("notifier");
    let (trigger, signal) = shutdown::channel();

    let task = tokio::spawn(notifier.run(signal));
    trigger.trigger();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("notifier should stop promptly")
        .expect("no panic");
    assert!(result.is_ok());
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_metron_sink_sends_value_metric_envelope() {
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("bind receiver");
    let metron_address = receiver.local_addr().expect("addr").to_string();
    let sink = MetronSink::bind(metron_address, "etcd")
        .await
        .expect("bind sink");

    sink.send_value("Latency", 2.5, "ms").await.expect("send");

    let mut buf = [0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
        .await
        .expect("datagram should arrive")
        .expect("recv");
    let envelope: ValueMetricEnvelope = serde_json::from_slice(&buf[..len]).expect("decode");

    assert_eq!(envelope.origin, "etcd");
    assert_eq!(envelope.event_type, "ValueMetric");
    assert!(envelope.timestamp > 0);
    assert_eq!(
        envelope.value_metric,
        ValueMetric {
            name: "Latency".to_string(),
            value: 2.5,
            unit: "ms".to_string(),
        }
    );

    let raw: serde_json::Value = serde_json::from_slice(&buf[..len]).expect("decode raw");
    assert!(raw.get("valueMetric").is_some());
    assert!(raw.get("eventType").is_some());
}
