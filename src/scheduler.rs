// src/scheduler.rs
//! # Scheduler
//! Wall-clock job scheduler with single-flight semantics.
//!
//! One background task polls every `tick_interval` (1s by default) and calls
//! [`Scheduler::tick`] with the local time. Due jobs run on their own tokio
//! tasks, so a long run never blocks the polling loop. A job that is still
//! running when its next firing comes due is skipped, not queued; the skip
//! is logged, counted in [`JobStats`] and in `scheduler_job_skipped_total`.
//!
//! Job errors and panics are caught at this boundary and recorded; the loop
//! keeps going and the next firing still happens.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Months, NaiveDateTime, NaiveTime};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    /// The `n`-th occurrence after `first` (n = 0 is `first` itself).
    /// Monthly keeps the day of month of `first`, clamped to shorter months.
    fn nth(self, first: NaiveDateTime, n: u32) -> Option<NaiveDateTime> {
        match self {
            Cadence::Daily => first.checked_add_signed(chrono::Duration::days(i64::from(n))),
            Cadence::Weekly => first.checked_add_signed(chrono::Duration::weeks(i64::from(n))),
            Cadence::Monthly => first.checked_add_months(Months::new(n)),
        }
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobFn`].
pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    SkippedRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub fired: u64,
    pub skipped: u64,
    pub failed: u64,
    pub succeeded: u64,
    pub last_error: Option<String>,
}

struct Job {
    at: NaiveTime,
    cadence: Cadence,
    callback: JobFn,
    first_fire: Option<NaiveDateTime>,
    occurrence: u32,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<JobStats>>,
}

impl Job {
    fn next_fire(&self) -> Option<NaiveDateTime> {
        self.first_fire
            .and_then(|first| self.cadence.nth(first, self.occurrence))
    }
}

/// Resets the job's running flag however the body ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Inner {
    jobs: Mutex<HashMap<String, Job>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
    stopped: AtomicBool,
    tick_interval: Duration,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_tick(DEFAULT_TICK)
    }

    pub fn with_tick(tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                loop_handle: Mutex::new(None),
                active: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                tick_interval,
            }),
        }
    }

    /// Register a job, replacing any job with the same id.
    ///
    /// A replacement inherits the running flag and statistics of the job it
    /// replaces, so a body still in flight keeps blocking new firings of the id.
    pub fn add_job(&self, id: &str, at: NaiveTime, cadence: Cadence, callback: JobFn) {
        let mut jobs = self.inner.jobs.lock().expect("scheduler mutex poisoned");
        let (running, stats) = match jobs.remove(id) {
            Some(old) => {
                tracing::info!(job = id, in_flight = old.running.load(Ordering::SeqCst), "replacing existing job");
                (old.running, old.stats)
            }
            None => (
                Arc::new(AtomicBool::new(false)),
                Arc::new(Mutex::new(JobStats::default())),
            ),
        };
        jobs.insert(
            id.to_string(),
            Job {
                at,
                cadence,
                callback,
                first_fire: None,
                occurrence: 0,
                running,
                stats,
            },
        );
        tracing::info!(job = id, %at, ?cadence, "job registered");
    }

    /// Cancel a job. Returns false if it was not registered.
    pub fn remove_job(&self, id: &str) -> bool {
        let removed = self
            .inner
            .jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(job = id, "job removed");
        }
        removed
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn job_stats(&self, id: &str) -> Option<JobStats> {
        let jobs = self.inner.jobs.lock().expect("scheduler mutex poisoned");
        let job = jobs.get(id)?;
        let stats = job.stats.lock().expect("job stats mutex poisoned").clone();
        Some(stats)
    }

    pub fn is_job_running(&self, id: &str) -> bool {
        self.inner
            .jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .get(id)
            .is_some_and(|j| j.running.load(Ordering::SeqCst))
    }

    pub fn next_fire(&self, id: &str) -> Option<NaiveDateTime> {
        self.inner
            .jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .get(id)
            .and_then(Job::next_fire)
    }

    pub fn state(&self) -> SchedulerState {
        if !self.inner.active.load(Ordering::SeqCst) {
            return if self.inner.stopped.load(Ordering::SeqCst) {
                SchedulerState::Stopped
            } else {
                SchedulerState::Idle
            };
        }
        let jobs = self.inner.jobs.lock().expect("scheduler mutex poisoned");
        if jobs.values().any(|j| j.running.load(Ordering::SeqCst)) {
            SchedulerState::Running
        } else if jobs.is_empty() {
            SchedulerState::Idle
        } else {
            SchedulerState::Armed
        }
    }

    /// Fire every job due at `now`. Must be called inside a tokio runtime.
    pub fn tick(&self, now: NaiveDateTime) -> Vec<(String, FireOutcome)> {
        let mut outcomes = Vec::new();
        let mut jobs = self.inner.jobs.lock().expect("scheduler mutex poisoned");

        for (id, job) in jobs.iter_mut() {
            let at = job.at;
            let first = *job.first_fire.get_or_insert_with(|| {
                let today = now.date().and_time(at);
                if today >= now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            });
            let Some(due) = job.cadence.nth(first, job.occurrence) else {
                continue;
            };
            if now < due {
                continue;
            }

            // Advance past `now`; missed occurrences (e.g. after a suspend) collapse into one firing.
            while job.next_fire().is_some_and(|t| t <= now) {
                job.occurrence += 1;
            }

            if job.running.swap(true, Ordering::SeqCst) {
                job.stats.lock().expect("job stats mutex poisoned").skipped += 1;
                counter!("scheduler_job_skipped_total", "job" => id.clone()).increment(1);
                tracing::warn!(job = %id, %due, "previous run still in progress, firing skipped");
                outcomes.push((id.clone(), FireOutcome::SkippedRunning));
                continue;
            }

            job.stats.lock().expect("job stats mutex poisoned").fired += 1;
            tracing::info!(job = %id, %due, "job fired");
            spawn_job(id.clone(), job);
            outcomes.push((id.clone(), FireOutcome::Started));
        }
        outcomes
    }

    /// Start the polling loop. No-op (with a warning) if already started.
    pub fn start(&self) {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler already running");
            return;
        }
        self.inner.stopped.store(false, Ordering::SeqCst);

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !this.inner.active.load(Ordering::SeqCst) {
                    break;
                }
                this.tick(Local::now().naive_local());
            }
        });
        *self.inner.loop_handle.lock().expect("scheduler mutex poisoned") = Some(handle);
        tracing::info!(tick_ms = self.inner.tick_interval.as_millis() as u64, "scheduler started");
    }

    /// Stop future firings. Job bodies already running are left to finish.
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(h) = self
            .inner
            .loop_handle
            .lock()
            .expect("scheduler mutex poisoned")
            .take()
        {
            h.abort();
        }
        tracing::info!("scheduler stopped");
    }
}

fn spawn_job(id: String, job: &Job) {
    let guard = RunningGuard(job.running.clone());
    let callback = job.callback.clone();
    let stats = job.stats.clone();

    tokio::spawn(async move {
        let _guard = guard;
        // inner task so a panicking body surfaces as a JoinError here
        let outcome = tokio::spawn(async move { callback().await }).await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(join_err) => Some(format!("job panicked: {join_err}")),
        };

        let mut st = stats.lock().expect("job stats mutex poisoned");
        match error {
            None => {
                st.succeeded += 1;
                tracing::info!(job = %id, "job finished");
            }
            Some(err) => {
                st.failed += 1;
                counter!("scheduler_job_failed_total", "job" => id.clone()).increment(1);
                tracing::error!(job = %id, error = %err, "job failed");
                st.last_error = Some(err);
            }
        }
    });
}
