use anyhow::Context as _;
use clap::Parser;
use etcd_metrics_server::debug_server::{DebugServer, LogLevel};
use etcd_metrics_server::instruments::stats_client;
use etcd_metrics_server::notifier::{MetronSink, PeriodicNotifier};
use etcd_metrics_server::registrar::{CollectorRegistrar, NatsBus};
use etcd_metrics_server::runner::DEFAULT_STOP_GRACE_PERIOD;
use etcd_metrics_server::{shutdown, Config, MetricsServer};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; the filter stays reloadable for the debug server
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate()?;

    info!(
        name = %config.log_name(),
        etcd = %config.etcd_url(),
        index = config.index,
        port = config.port,
        "Starting etcd metrics server"
    );

    let (trigger, signal) = shutdown::channel();

    let debug_task = match config.debug_address {
        Some(addr) => {
            let debug_server = DebugServer::bind(addr, LogLevel::new(filter_handle)).await?;
            Some(tokio::spawn(debug_server.serve(trigger.signal())))
        }
        None => None,
    };

    let bus = NatsBus::connect(
        &config.nats_addresses(),
        &config.nats_username,
        &config.nats_password,
    )
    .await
    .context("failed to connect to NATS")?;

    let client = stats_client(config.communication_timeout())
        .context("failed to build etcd stats client")?;

    let sink = MetronSink::bind(config.metron_address.clone(), config.job_name.clone())
        .await
        .context("failed to open metron socket")?;
    let notifier = PeriodicNotifier::for_endpoint(
        &config.etcd_url(),
        client.clone(),
        Arc::new(sink),
        config.report_interval(),
    )?;

    let notifier_task = tokio::spawn(notifier.run(trigger.signal()));

    let server = MetricsServer::new(
        CollectorRegistrar::new(Arc::new(bus)),
        client,
        config.server_config(),
    );
    let mut server_task = tokio::spawn(server.run(signal));

    // Either a signal arrives or the server gives up on its own
    let served = tokio::select! {
        _ = shutdown_signal() => {
            trigger.trigger();
            server_task.await
        }
        result = &mut server_task => {
            trigger.trigger();
            result
        }
    };

    notifier_task.await??;
    if let Some(mut debug_task) = debug_task {
        match tokio::time::timeout(DEFAULT_STOP_GRACE_PERIOD, &mut debug_task).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!("Debug server did not drain in time, aborting");
                debug_task.abort();
            }
        }
    }
    if let Err(e) = served? {
        error!(error = %e, "etcd metrics server failed");
        return Err(e.into());
    }

    info!("etcd metrics server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
