// src/metrics.rs
//! Prometheus recorder and the `/metrics` route.
//!
//! Counters and histograms are emitted from the monitor, sources and scheduler;
//! this module only installs the recorder and renders it.

use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::config::MonitorSettings;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish static config gauges.
    pub fn init(settings: &MonitorSettings) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        gauge!("monitor_config_max_results").set(settings.max_results as f64);
        gauge!("monitor_config_dedup_window_days").set(f64::from(settings.dedup_window_days));
        gauge!("monitor_config_retention_days").set(f64::from(settings.retention_days));

        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; for router tests.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
