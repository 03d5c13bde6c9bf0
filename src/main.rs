//! Keyword monitor binary.
//! Loads config, wires store, sources, notifiers and the scheduler, and serves
//! the read-only HTTP surface until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keyword_monitor::api::{self, AppState};
use keyword_monitor::metrics::Metrics;
use keyword_monitor::scheduler::{job_fn, Cadence};
use keyword_monitor::source::build_http_client;
use keyword_monitor::{
    AppConfig, CancelToken, ContentStore, Monitor, MonitorOptions, NotifierMux, Scheduler, SourceRegistry,
};

const ENV_RUN_ONCE: &str = "MONITOR_RUN_ONCE";
const ENV_LOG_JSON: &str = "MONITOR_LOG_JSON";

/// Compact logs by default, JSON lines with MONITOR_LOG_JSON=1.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyword_monitor=info,warn"));

    let json = std::env::var(ENV_LOG_JSON).ok().is_some_and(|v| v == "1");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl-c handler failed");
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; SMTP_PASSWORD and MONITOR_CONFIG_PATH may live there.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading monitor config")?;
    let metrics = Metrics::init(&cfg.monitor).context("installing prometheus recorder")?;

    let store = ContentStore::open(&cfg.monitor.data_dir)
        .await
        .context("opening data directory")?;
    let client = build_http_client(Duration::from_secs(cfg.monitor.fetch_timeout_secs));
    let registry = SourceRegistry::from_settings(&cfg.sources, client).context("building source adapters")?;

    let mut monitor = Monitor::new(registry, store.clone(), MonitorOptions::from(&cfg.monitor));
    let mux = NotifierMux::from_config(&cfg);
    if mux.is_empty() {
        tracing::warn!("no notification channel configured, reports will only be stored");
    } else {
        monitor = monitor.with_notifier(Arc::new(mux), cfg.receivers());
    }
    let monitor = Arc::new(monitor);
    let cancel = CancelToken::new();

    if std::env::var(ENV_RUN_ONCE).ok().is_some_and(|v| v == "1") {
        let r = monitor.run_today(&cancel).await.context("monitor run")?;
        info!(date = %r.date, findings = r.findings.len(), failures = r.failures.len(), notified = r.notified, "single run done");
        return Ok(());
    }

    let scheduler = Scheduler::new();
    {
        let m = monitor.clone();
        let c = cancel.clone();
        scheduler.add_job(
            "monitor",
            cfg.schedule.run_time()?,
            cfg.schedule.cadence,
            job_fn(move || {
                let m = m.clone();
                let c = c.clone();
                async move {
                    m.run_today(&c).await.context("monitor run")?;
                    Ok(())
                }
            }),
        );
    }
    {
        let m = monitor.clone();
        scheduler.add_job(
            "cleanup",
            cfg.schedule.cleanup_run_time()?,
            Cadence::Daily,
            job_fn(move || {
                let m = m.clone();
                async move {
                    m.cleanup(Local::now().date_naive()).await.context("retention cleanup")?;
                    Ok(())
                }
            }),
        );
    }
    scheduler.start();

    let app = api::router(AppState::new(store, cfg.monitor.dedup_window_days), &metrics);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    info!(bind = %cfg.server.bind, "http surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    scheduler.stop();
    while scheduler.is_job_running("monitor") || scheduler.is_job_running("cleanup") {
        info!("waiting for in-flight job to finish");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}
