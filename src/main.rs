//! Property services health monitor.
//!
//! Polls the endpoints listed in `application-{profile}.yml` and serves
//! their health:
//!
//! - `GET /snapshot`: status of every target, optionally `?building=&service=`.
//! - `GET /summary`: number of targets per status and per building.
//! - `GET /targets`, `POST /targets`: list or register targets.
//! - `DELETE /targets/:name`: stop monitoring a target.
//! - `POST /targets/:name/reset`, `POST /targets/:name/poll`,
//!   `GET /targets/:name/history`.
//! - `POST /complaints`, `GET /complaints`: record or list resident complaints.
//! - `GET /complaints/summary`: complaints per service and severity, and
//!   12 hour rolling counts per building and service.
//!
//! Run with
//!
//! ```not_rust
//! PROPERTY_HEALTH_CONFIG_DIR=. cargo run
//! ```

use anyhow::Context;
use property_health::config::{config_dir, load_bootstrap_config, AlarmConfig};
use property_health::core::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "property_health=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let dir = config_dir();
    let config = load_bootstrap_config(&dir)
        .with_context(|| format!("loading configuration from {}", dir.display()))?;
    let addr: SocketAddr = config
        .server
        .addr
        .parse()
        .with_context(|| format!("invalid server.addr `{}`", config.server.addr))?;

    // Logger consumes status transitions on its own thread
    let (tx, rx) = mpsc::channel(256);
    let notifier: Option<Box<dyn Notifier>> = match &config.alarm {
        Some(alarm) => match Alarm::new(alarm) {
            Ok(alarm) => Some(Box::new(alarm)),
            Err(e) => {
                tracing::error!("alarm disabled: {}", e);
                None
            }
        },
        None => None,
    };
    let logger = tokio::task::spawn_blocking(move || Logger::new(notifier).run(rx));

    let aggregator = Arc::new(HealthAggregator::new(Doctor::new()).with_events(tx.clone()));
    let scheduler = Arc::new(Scheduler::new(aggregator.clone()));
    for target in config.service_targets() {
        let name = target.name.clone();
        scheduler
            .register(target)
            .with_context(|| format!("registering target `{}`", name))?;
    }
    tracing::info!(targets = scheduler.scheduled(), "monitoring started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter = config.alarm.as_ref().map(|alarm| {
        spawn_reporter(alarm, aggregator.clone(), tx.clone(), shutdown_rx.clone())
    });
    drop(tx);

    let complaints = Arc::new(ComplaintLog::default());
    let mut server_shutdown = shutdown_rx.clone();
    let mut server = tokio::spawn(listen(addr, scheduler.clone(), complaints, async move {
        let _ = server_shutdown.changed().await;
    }));

    // a server that stops on its own (bind failure, serve error) ends the process too
    let stopped_early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            tracing::info!("shutting down");
            None
        }
        served = &mut server => {
            tracing::error!("api server stopped, shutting down");
            Some(served)
        }
    };
    let _ = shutdown_tx.send(true);

    scheduler.shutdown().await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    let early = stopped_early.is_some();
    let served = match stopped_early {
        Some(served) => served,
        None => server.await,
    };
    drop(scheduler);
    drop(aggregator);
    if time::timeout(Duration::from_secs(5), logger).await.is_err() {
        tracing::warn!("logger did not drain in time");
    }

    match served {
        Ok(Ok(())) if early => Err(anyhow::anyhow!("api server stopped unexpectedly")),
        Ok(result) => result.context("serving api"),
        Err(e) => Err(anyhow::Error::new(e).context("api server task failed")),
    }
}

// Every `report_interval_seconds` hands the current snapshot to the logger
// for a digest alert.
fn spawn_reporter(
    alarm: &AlarmConfig,
    aggregator: Arc<HealthAggregator>,
    tx: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(alarm.report_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tx.send(Event::Report(aggregator.get_snapshot())).await.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
