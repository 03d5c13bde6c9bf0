// src/monitor.rs
//! # Monitor
//! One pipeline run: search every `(keyword, source)` pair, drop URLs already
//! reported in the trailing dedup window, bound and order the result, persist
//! findings and statistics for the day, then notify.
//!
//! Fetch failures are per pair and never fail the run. Only the content
//! store can make [`Monitor::run`] return an error.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::MonitorSettings;
use crate::error::{ConfigError, StoreError};
use crate::model::{Finding, ReportPayload, StatisticsRecord};
use crate::notify::Notifier;
use crate::source::SourceRegistry;
use crate::store::{window_dates, ContentStore};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("monitor_runs_total", "Pipeline runs started.");
        describe_counter!(
            "monitor_fetch_errors_total",
            "Failed (keyword, source) searches."
        );
        describe_counter!(
            "monitor_dedup_total",
            "Candidates dropped because their URL was already reported."
        );
        describe_counter!("monitor_findings_total", "Findings persisted.");
        describe_counter!(
            "monitor_history_read_errors_total",
            "Stored days that could not be read while building the dedup set."
        );
        describe_histogram!("monitor_fetch_ms", "Source search latency in milliseconds.");
        describe_gauge!("monitor_last_run_ts", "Unix ts when the pipeline last finished.");
        describe_counter!(
            "scheduler_job_skipped_total",
            "Firings skipped because the previous run was still going."
        );
        describe_counter!("scheduler_job_failed_total", "Job bodies that failed or panicked.");
    });
}

/// Cooperative cancellation for a run.
///
/// Checked before each keyword round. The sources of one round are searched
/// concurrently, so every `(keyword, source)` pair of a started round runs to
/// completion (or to its fetch timeout); no pair of a later round starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub keywords: Vec<String>,
    pub sources: Vec<String>,
    pub dedup_window_days: u32,
    pub max_results: usize,
    pub retention_days: u32,
    pub fetch_timeout: Duration,
    pub politeness_delay: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for MonitorOptions {
    fn from(s: &MonitorSettings) -> Self {
        Self {
            keywords: s.keywords.clone(),
            sources: s.sources.clone(),
            dedup_window_days: s.dedup_window_days,
            max_results: s.max_results,
            retention_days: s.retention_days,
            fetch_timeout: Duration::from_secs(s.fetch_timeout_secs),
            politeness_delay: Duration::from_millis(s.politeness_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FetchFailure {
    pub keyword: String,
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunResult {
    pub date: NaiveDate,
    pub findings: Vec<Finding>,
    pub statistics: StatisticsRecord,
    pub failures: Vec<FetchFailure>,
    pub duplicates_dropped: usize,
    pub cap_reached: bool,
    pub notified: bool,
    pub cancelled: bool,
}

pub struct Monitor {
    registry: SourceRegistry,
    store: ContentStore,
    notifier: Option<Arc<dyn Notifier>>,
    receivers: Vec<String>,
    opts: MonitorOptions,
    run_lock: Mutex<()>,
}

impl Monitor {
    pub fn new(registry: SourceRegistry, store: ContentStore, opts: MonitorOptions) -> Self {
        Self {
            registry,
            store,
            notifier: None,
            receivers: Vec::new(),
            opts,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>, receivers: Vec<String>) -> Self {
        self.notifier = Some(notifier);
        self.receivers = receivers;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.opts
    }

    /// Run with the configured keywords and sources for today's local date.
    pub async fn run_today(&self, cancel: &CancelToken) -> Result<RunResult, StoreError> {
        let date = Local::now().date_naive();
        self.run(&self.opts.keywords, &self.opts.sources, date, cancel)
            .await
    }

    pub async fn run(
        &self,
        keywords: &[String],
        sources: &[String],
        date: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<RunResult, StoreError> {
        ensure_metrics_described();
        let _running = self.run_lock.lock().await;
        counter!("monitor_runs_total").increment(1);
        tracing::info!(%date, keywords = keywords.len(), sources = sources.len(), "monitor run started");

        let mut seen = self.reported_urls(date).await;

        let cap = self.opts.max_results;
        let mut candidates: Vec<Finding> = Vec::new();
        let mut failures = Vec::new();
        let mut duplicates = 0usize;
        let mut cap_reached = false;
        let mut cancelled = false;

        for (round, keyword) in keywords.iter().enumerate() {
            if candidates.len() >= cap {
                tracing::info!(%date, %keyword, cap, "result cap reached, skipping remaining keywords");
                cap_reached = true;
                break;
            }
            if round > 0 && !self.opts.politeness_delay.is_zero() {
                tokio::time::sleep(self.opts.politeness_delay).await;
            }
            if cancel.is_cancelled() {
                tracing::warn!(%date, %keyword, "run cancelled, skipping remaining keywords");
                cancelled = true;
                break;
            }

            let searches = sources
                .iter()
                .map(|s| self.registry.search(s, keyword, self.opts.fetch_timeout));
            let results = join_all(searches).await;

            for (source, res) in sources.iter().zip(results) {
                match res {
                    Ok(items) => {
                        tracing::debug!(%date, %keyword, %source, items = items.len(), "search ok");
                        for item in items {
                            if item.url.is_empty() {
                                continue;
                            }
                            if !seen.insert(item.url.clone()) {
                                duplicates += 1;
                                continue;
                            }
                            candidates.push(item.into_finding(keyword));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%date, %keyword, %source, error = %e, "search failed");
                        counter!("monitor_fetch_errors_total", "source" => source.clone()).increment(1);
                        failures.push(FetchFailure {
                            keyword: keyword.clone(),
                            source: source.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let mut findings = candidates;
        findings.sort_by(|a, b| a.title.cmp(&b.title));
        cap_reached |= findings.len() > cap;
        findings.truncate(cap);
        let statistics = StatisticsRecord::from_findings(&findings);

        self.store.save_findings(date, &findings).await?;
        self.store.save_statistics(date, &statistics).await?;

        counter!("monitor_dedup_total").increment(duplicates as u64);
        counter!("monitor_findings_total").increment(findings.len() as u64);
        gauge!("monitor_last_run_ts").set(Local::now().timestamp() as f64);

        let notified = if findings.is_empty() {
            tracing::info!(%date, "no new findings, notification skipped");
            false
        } else {
            let report = ReportPayload {
                date,
                keywords: keywords.to_vec(),
                findings: findings.clone(),
                statistics: statistics.clone(),
            };
            self.notify(&report).await
        };

        tracing::info!(
            %date,
            findings = findings.len(),
            duplicates,
            failures = failures.len(),
            cap_reached,
            cancelled,
            "monitor run finished"
        );

        Ok(RunResult {
            date,
            findings,
            statistics,
            failures,
            duplicates_dropped: duplicates,
            cap_reached,
            notified,
            cancelled,
        })
    }

    /// URLs stored for the days before `date` inside the dedup window. The
    /// run's own date is excluded, so rerunning a date reproduces the same
    /// record. Unreadable days are logged and skipped.
    async fn reported_urls(&self, date: NaiveDate) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(prev) = date.pred_opt() else {
            return seen;
        };
        for day in window_dates(prev, self.opts.dedup_window_days.saturating_sub(1)) {
            match self.store.load_findings(day).await {
                Ok(Some(findings)) => seen.extend(findings.into_iter().map(|f| f.url)),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(%date, history_date = %day, error = %e, "history record unreadable, left out of dedup");
                    counter!("monitor_history_read_errors_total").increment(1);
                }
            }
        }
        seen
    }

    async fn notify(&self, report: &ReportPayload) -> bool {
        let Some(notifier) = &self.notifier else {
            let e = ConfigError::Missing("notifier");
            tracing::warn!(date = %report.date, error = %e, "findings not sent");
            return false;
        };
        // webhook-only setups have no receivers and still deliver
        if self.receivers.is_empty() && notifier.requires_receivers() {
            let e = ConfigError::Missing("email.receivers");
            tracing::warn!(date = %report.date, error = %e, "findings not sent");
            return false;
        }
        match notifier.send_report(&self.receivers, report).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(date = %report.date, channel = notifier.name(), error = %e, "notification failed");
                false
            }
        }
    }

    /// Recompute statistics for days that have findings but no statistics record.
    pub async fn repair_statistics(&self, end: NaiveDate, window_days: u32) -> Result<Vec<NaiveDate>, StoreError> {
        let mut repaired = Vec::new();
        for date in window_dates(end, window_days) {
            let Some(findings) = self.store.load_findings(date).await? else {
                continue;
            };
            if self.store.load_statistics(date).await?.is_some() {
                continue;
            }
            let stats = StatisticsRecord::from_findings(&findings);
            self.store.save_statistics(date, &stats).await?;
            tracing::info!(%date, total = stats.total_findings, "statistics repaired");
            repaired.push(date);
        }
        Ok(repaired)
    }

    /// Apply the retention policy relative to `today`.
    pub async fn cleanup(&self, today: NaiveDate) -> Result<usize, StoreError> {
        let removed = self
            .store
            .cleanup_old_data(today, self.opts.retention_days)
            .await?;
        tracing::info!(%today, removed, retention_days = self.opts.retention_days, "cleanup finished");
        Ok(removed)
    }
}
