//! Tests for the etcd metrics server runner

use super::*;
use crate::instruments::stats_client;
use crate::registrar::{LocalBus, ANNOUNCE_COMPONENT_MESSAGE_SUBJECT};
use crate::shutdown;
use axum::routing::get;
use axum::Router;
use std::net::Ipv4Addr;
use tokio::net::TcpListener;

const SELF_JSON: &str = r#"{"state":"StateLeader","sendAppendRequestCnt":7}"#;

/// Fake etcd node answering `/v2/stats/self`; returns its host:port
async fn spawn_fake_etcd() -> String {
    let router = Router::new().route("/v2/stats/self", get(|| async { SELF_JSON }));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake etcd");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake etcd serve");
    });
    addr.to_string()
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

fn server_config(etcd_address: &str, port: u16) -> MetricsServerConfig {
    MetricsServerConfig {
        job_name: "etcd".to_string(),
        index: 3,
        address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        port,
        credentials: Credentials::new("user", "pass"),
        etcd_url: format!("http://{}", etcd_address),
        etcd_address: etcd_address.to_string(),
    }
}

fn metrics_server(bus: &LocalBus, config: MetricsServerConfig) -> MetricsServer {
    MetricsServer::new(
        CollectorRegistrar::new(Arc::new(bus.clone())),
        stats_client(Duration::from_secs(2)).expect("client"),
        config,
    )
}

/// Retry `/healthz` with backoff until the server answers
async fn wait_for_server(port: u16, max_retries: u32) -> reqwest::Response {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .send()
            .await
        {
            Ok(response) => return response,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(200));
            }
            Err(e) => panic!("server not ready after {} attempts: {}", max_retries, e),
        }
    }
    unreachable!()
}

#[test]
fn test_build_component_uses_config() {
    let bus = LocalBus::new();
    let server = metrics_server(&bus, server_config("127.0.0.1:4001", 5679));

    let component = server.build_component().expect("component");

    assert_eq!(component.name(), "etcd");
    assert_eq!(component.index(), 3);
    assert_eq!(component.status_port(), 5679);
    assert_eq!(component.credentials(), &Credentials::new("user", "pass"));
}

#[tokio::test]
async fn test_serves_registers_and_stops_on_shutdown() {
    let etcd = spawn_fake_etcd().await;
    let port = free_port();
    let bus = LocalBus::new();
    let (trigger, signal) = shutdown::channel();

    let task = tokio::spawn(metrics_server(&bus, server_config(&etcd, port)).run(signal));

    let health = wait_for_server(port, 20).await;
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.expect("body"), "ok");

    let varz: serde_json::Value = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/varz", port))
        .basic_auth("user", Some("pass"))
        .send()
        .await
        .expect("varz request")
        .json()
        .await
        .expect("varz json");
    let contexts: Vec<&str> = varz["contexts"]
        .as_array()
        .expect("contexts")
        .iter()
        .map(|context| context["name"].as_str().expect("context name"))
        .collect();
    assert_eq!(contexts, vec!["leader", "server", "store"]);
    assert_eq!(varz["contexts"][1]["metrics"][0]["name"], "IsLeader");
    assert_eq!(varz["contexts"][1]["metrics"][0]["value"], 1);

    let announced = bus.published_messages(ANNOUNCE_COMPONENT_MESSAGE_SUBJECT);
    assert_eq!(announced.len(), 1);

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("runner should stop")
        .expect("no panic")
        .expect("clean shutdown");

    assert!(
        reqwest::get(format!("http://127.0.0.1:{}/healthz", port))
            .await
            .is_err(),
        "status port should be closed after shutdown"
    );
}

#[tokio::test]
async fn test_healthz_reports_bad_when_etcd_is_down() {
    let etcd_port = free_port();
    let port = free_port();
    let bus = LocalBus::new();
    let (trigger, signal) = shutdown::channel();

    let task = tokio::spawn(
        metrics_server(&bus, server_config(&format!("127.0.0.1:{}", etcd_port), port)).run(signal),
    );

    let health = wait_for_server(port, 20).await;
    assert_eq!(health.text().await.expect("body"), "bad");

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("runner should stop")
        .expect("no panic")
        .expect("clean shutdown");
}

#[tokio::test]
async fn test_registration_failure_stops_the_status_server() {
    let etcd = spawn_fake_etcd().await;
    let port = free_port();
    let bus = LocalBus::new();
    bus.fail_publishing(ANNOUNCE_COMPONENT_MESSAGE_SUBJECT, "oh no!");
    let (_trigger, signal) = shutdown::channel();

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        metrics_server(&bus, server_config(&etcd, port)).run(signal),
    )
    .await
    .expect("runner should return")
    .expect_err("registration failure should surface");

    assert!(matches!(err, RunnerError::Registrar(_)), "got {:?}", err);
    std::net::TcpListener::bind(("127.0.0.1", port)).expect("status port should be released");
}

#[tokio::test]
async fn test_port_in_use_ends_the_run() {
    let etcd = spawn_fake_etcd().await;
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = occupied.local_addr().expect("local addr").port();
    let bus = LocalBus::new();
    let (_trigger, signal) = shutdown::channel();

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        metrics_server(&bus, server_config(&etcd, port)).run(signal),
    )
    .await
    .expect("runner should return")
    .expect_err("bind failure should surface");

    assert!(
        matches!(err, RunnerError::Component(ComponentError::Bind { .. })),
        "got {:?}",
        err
    );
}

#[tokio::test]
async fn test_shutdown_is_bounded_by_a_stalled_connection() {
    use tokio::io::AsyncWriteExt;

    let etcd = spawn_fake_etcd().await;
    let port = free_port();
    let bus = LocalBus::new();
    let (trigger, signal) = shutdown::channel();

    let server = metrics_server(&bus, server_config(&etcd, port))
        .with_stop_grace_period(Duration::from_millis(200));
    let task = tokio::spawn(server.run(signal));
    wait_for_server(port, 20).await;

    // Request head that never finishes keeps the connection busy
    let mut stalled = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect");
    stalled
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: 127.0.0.1\r\n")
        .await
        .expect("write partial head");
    tokio::time::sleep(Duration::from_millis(50)).await;

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("shutdown should not wait on the stalled connection")
        .expect("no panic")
        .expect("clean shutdown");

    assert!(
        reqwest::get(format!("http://127.0.0.1:{}/healthz", port))
            .await
            .is_err(),
        "status port should be closed after shutdown"
    );
    drop(stalled);
}
