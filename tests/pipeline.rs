// tests/pipeline.rs
//
// End-to-end pipeline runs against in-memory source adapters and a temp
// data directory. Covers ordering, dedup across days, the result cap,
// partial fetch failure, damaged records, cancellation and notification
// gating.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use keyword_monitor::error::{FetchError, NotifyError, StoreError};
use keyword_monitor::model::{RawItem, ReportPayload, StatisticsRecord};
use keyword_monitor::{CancelToken, ContentStore, Monitor, MonitorOptions, Notifier, SourceAdapter, SourceRegistry};

/// Returns the same fixed items for every keyword.
struct Fixed {
    name: &'static str,
    items: Vec<(&'static str, &'static str)>,
    calls: AtomicUsize,
}

impl Fixed {
    fn new(name: &'static str, items: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            name,
            items,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for Fixed {
    fn name(&self) -> &str {
        self.name
    }
    async fn search(&self, _keyword: &str) -> Result<Vec<RawItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .items
            .iter()
            .map(|(url, title)| RawItem {
                title: title.to_string(),
                url: url.to_string(),
                source: self.name.to_string(),
                time: "2025-03-01 08:00:00".into(),
                description: String::new(),
            })
            .collect())
    }
}

/// `n` distinct items per keyword.
struct Many {
    n: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl SourceAdapter for Many {
    fn name(&self) -> &str {
        "many"
    }
    async fn search(&self, keyword: &str) -> Result<Vec<RawItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.n)
            .map(|i| RawItem {
                title: format!("{keyword} item {i:02}"),
                url: format!("https://many.test/{keyword}/{i}"),
                source: "many".into(),
                time: String::new(),
                description: String::new(),
            })
            .collect())
    }
}

struct Broken;

#[async_trait]
impl SourceAdapter for Broken {
    fn name(&self) -> &str {
        "broken"
    }
    async fn search(&self, _keyword: &str) -> Result<Vec<RawItem>, FetchError> {
        Err(FetchError::Network("connection reset".into()))
    }
}

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<ReportPayload>>,
}

#[async_trait]
impl Notifier for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }
    async fn send_report(&self, _receivers: &[String], report: &ReportPayload) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(report.clone());
        Ok(())
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn opts(window: u32, cap: usize) -> MonitorOptions {
    MonitorOptions {
        dedup_window_days: window,
        max_results: cap,
        politeness_delay: Duration::ZERO,
        ..MonitorOptions::default()
    }
}

fn assert_consistent(stats: &StatisticsRecord, findings: &[keyword_monitor::model::Finding]) {
    assert_eq!(stats.keyword_stats.values().sum::<usize>(), stats.total_findings);
    assert_eq!(stats.total_findings, findings.len());
    let mut sources: Vec<_> = findings.iter().map(|f| f.source.as_str()).collect();
    sources.sort();
    sources.dedup();
    assert_eq!(stats.sources_count, sources.len());
}

#[tokio::test]
async fn sorted_run_then_next_day_rerun_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("a", "B"), ("b", "A")]));
    let recorder = Arc::new(Recorder::default());
    let monitor = Monitor::new(reg, store.clone(), opts(7, 10))
        .with_notifier(recorder.clone(), strings(&["ops@example.com"]));
    let kws = strings(&["k1"]);
    let srcs = strings(&["s1"]);

    let r1 = monitor.run(&kws, &srcs, day(1), &CancelToken::new()).await.unwrap();
    let titles: Vec<_> = r1.findings.iter().map(|f| (f.title.as_str(), f.url.as_str())).collect();
    assert_eq!(titles, vec![("A", "b"), ("B", "a")]);
    assert_eq!(r1.statistics.total_findings, 2);
    assert_eq!(r1.statistics.sources_count, 1);
    assert_eq!(r1.statistics.keywords_count, 1);
    assert_eq!(r1.statistics.keyword_stats.get("k1"), Some(&2));
    assert!(r1.notified);
    assert_eq!(store.load_statistics(day(1)).await.unwrap(), Some(r1.statistics.clone()));

    let r2 = monitor.run(&kws, &srcs, day(2), &CancelToken::new()).await.unwrap();
    assert!(r2.findings.is_empty());
    assert_eq!(r2.statistics, StatisticsRecord::default());
    assert_eq!(r2.duplicates_dropped, 2);
    assert!(!r2.notified);
    assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    assert_eq!(store.load_findings(day(2)).await.unwrap(), Some(vec![]));
}

#[tokio::test]
async fn same_day_rerun_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("a", "B"), ("b", "A")]));
    let monitor = Monitor::new(reg, store.clone(), opts(7, 10));
    let kws = strings(&["k1"]);
    let srcs = strings(&["s1"]);

    let r1 = monitor.run(&kws, &srcs, day(1), &CancelToken::new()).await.unwrap();
    let bytes1 = std::fs::read(tmp.path().join("2025-03-01.json")).unwrap();
    let r2 = monitor.run(&kws, &srcs, day(1), &CancelToken::new()).await.unwrap();
    let bytes2 = std::fs::read(tmp.path().join("2025-03-01.json")).unwrap();

    assert_eq!(r1.findings, r2.findings);
    assert_eq!(bytes1, bytes2);
}

#[tokio::test]
async fn dedup_is_bounded_by_window() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("x", "X")]));
    let monitor = Monitor::new(reg, store, opts(3, 10));
    let kws = strings(&["k"]);
    let srcs = strings(&["s1"]);
    let c = CancelToken::new();

    assert_eq!(monitor.run(&kws, &srcs, day(1), &c).await.unwrap().findings.len(), 1);
    // k = 2 < window
    assert!(monitor.run(&kws, &srcs, day(3), &c).await.unwrap().findings.is_empty());
    // k = 3 = window: day 1 fell out
    assert_eq!(monitor.run(&kws, &srcs, day(4), &c).await.unwrap().findings.len(), 1);
}

#[tokio::test]
async fn cap_truncates_and_skips_remaining_keywords() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let many = Arc::new(Many {
        n: 15,
        calls: AtomicUsize::new(0),
    });
    let reg = SourceRegistry::new().with(many.clone());
    let monitor = Monitor::new(reg, store, opts(7, 10));

    let r = monitor
        .run(&strings(&["alpha", "beta"]), &strings(&["many"]), day(1), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(r.findings.len(), 10);
    assert!(r.cap_reached);
    assert_eq!(many.calls.load(Ordering::SeqCst), 1);
    assert!(r.findings.windows(2).all(|w| w[0].title <= w[1].title));
    assert_consistent(&r.statistics, &r.findings);
}

#[tokio::test]
async fn one_failing_pair_does_not_fail_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new()
        .with(Fixed::new("s1", vec![("https://a.test/1", "one")]))
        .with(Fixed::new("s2", vec![("https://b.test/2", "two")]))
        .with(Arc::new(Broken));
    let monitor = Monitor::new(reg, store.clone(), opts(7, 10));

    let r = monitor
        .run(&strings(&["k"]), &strings(&["s1", "broken", "s2"]), day(1), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(r.findings.len(), 2);
    assert_eq!(r.failures.len(), 1);
    assert_eq!(r.failures[0].source, "broken");
    assert_eq!(r.failures[0].keyword, "k");
    assert_eq!(store.load_findings(day(1)).await.unwrap().unwrap().len(), 2);
    assert_consistent(&r.statistics, &r.findings);
}

#[tokio::test]
async fn unknown_source_counts_as_a_failed_pair() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("u", "t")]));
    let monitor = Monitor::new(reg, store, opts(7, 10));

    let r = monitor
        .run(&strings(&["k"]), &strings(&["s1", "ghost"]), day(1), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(r.findings.len(), 1);
    assert!(r.failures[0].error.contains("ghost"));
}

#[tokio::test]
async fn corrupt_history_day_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    std::fs::write(tmp.path().join("2025-03-01.json"), "][").unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("u", "t")]));
    let monitor = Monitor::new(reg, store, opts(7, 10));

    let r = monitor
        .run(&strings(&["k"]), &strings(&["s1"]), day(2), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(r.findings.len(), 1);
    let stored = monitor.store().load_findings(day(2)).await.unwrap().unwrap();
    assert_eq!(stored, r.findings);
}

#[tokio::test]
async fn rerun_repairs_a_corrupt_record_for_the_same_day() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    std::fs::write(tmp.path().join("2025-03-01.json"), "{truncated").unwrap();
    std::fs::write(tmp.path().join("stats_2025-03-01.json"), "").unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("u1", "a"), ("u2", "b")]));
    let monitor = Monitor::new(reg, store, opts(7, 10));

    let r = monitor
        .run(&strings(&["k"]), &strings(&["s1"]), day(1), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(r.findings.len(), 2);
    let stored = monitor.store().load_findings(day(1)).await.unwrap().unwrap();
    assert_eq!(stored, r.findings);
    let stats = monitor.store().load_statistics(day(1)).await.unwrap().unwrap();
    assert_consistent(&stats, &stored);
}

#[tokio::test]
async fn failed_findings_write_fails_the_run_before_statistics() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    // a directory where the record file belongs cannot be replaced by rename
    std::fs::create_dir(tmp.path().join("2025-03-01.json")).unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("u", "t")]));
    let notifier = Arc::new(Recorder::default());
    let monitor = Monitor::new(reg, store, opts(7, 10)).with_notifier(notifier.clone(), strings(&["ops@example.com"]));

    let err = monitor
        .run(&strings(&["k"]), &strings(&["s1"]), day(1), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Io { .. }));
    assert!(!tmp.path().join("stats_2025-03-01.json").exists());
    assert!(notifier.sent.lock().unwrap().is_empty());
}

struct Failing;

#[async_trait]
impl Notifier for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }
    async fn send_report(&self, _receivers: &[String], _report: &ReportPayload) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay refused".into()))
    }
}

#[tokio::test]
async fn notifier_failure_keeps_the_run_and_its_records() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("u", "t")]));
    let monitor = Monitor::new(reg, store, opts(7, 10)).with_notifier(Arc::new(Failing), strings(&["ops@example.com"]));

    let r = monitor
        .run(&strings(&["k"]), &strings(&["s1"]), day(1), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(r.findings.len(), 1);
    assert!(!r.notified);
    let stored = monitor.store().load_findings(day(1)).await.unwrap().unwrap();
    assert_eq!(stored, r.findings);
    assert!(monitor.store().load_statistics(day(1)).await.unwrap().is_some());
}

/// Delivers to a fixed destination, like a webhook.
#[derive(Default)]
struct Hook {
    calls: AtomicUsize,
}

#[async_trait]
impl Notifier for Hook {
    fn name(&self) -> &'static str {
        "hook"
    }
    fn requires_receivers(&self) -> bool {
        false
    }
    async fn send_report(&self, receivers: &[String], _report: &ReportPayload) -> Result<(), NotifyError> {
        assert!(receivers.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn fixed_destination_notifier_needs_no_receivers() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let reg = SourceRegistry::new().with(Fixed::new("s1", vec![("u", "t")]));
    let hook = Arc::new(Hook::default());
    let monitor = Monitor::new(reg, store, opts(7, 10)).with_notifier(hook.clone(), Vec::new());

    let r = monitor
        .run(&strings(&["k"]), &strings(&["s1"]), day(1), &CancelToken::new())
        .await
        .unwrap();
    assert!(r.notified);
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
}

/// Cancels the shared token from inside the first search.
struct CancelsDuringSearch {
    token: CancelToken,
    keywords: Mutex<Vec<String>>,
}

#[async_trait]
impl SourceAdapter for CancelsDuringSearch {
    fn name(&self) -> &str {
        "cancels"
    }
    async fn search(&self, keyword: &str) -> Result<Vec<RawItem>, FetchError> {
        self.keywords.lock().unwrap().push(keyword.to_string());
        self.token.cancel();
        Ok(vec![RawItem {
            title: format!("{keyword} news"),
            url: format!("https://cancels.test/{keyword}"),
            source: "cancels".into(),
            time: String::new(),
            description: String::new(),
        }])
    }
}

#[tokio::test]
async fn cancel_mid_run_finishes_the_round_and_stops() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ContentStore::open(tmp.path()).await.unwrap();
    let token = CancelToken::new();
    let adapter = Arc::new(CancelsDuringSearch {
        token: token.clone(),
        keywords: Mutex::new(Vec::new()),
    });
    let reg = SourceRegistry::new().with(adapter.clone());
    let monitor = Monitor::new(reg, store, opts(7, 10));

    let r = monitor
        .run(&strings(&["a", "b"]), &strings(&["cancels"]), day(1), &token)
        .await
        .unwrap();
    assert!(r.cancelled);
    assert_eq!(*adapter.keywords.lock().unwrap(), strings(&["a"]));
    assert_eq!(r.findings.len(), 1);
    assert_eq!(r.findings[0].keyword, "a");
    let stored = monitor.store().load_findings(day(1)).await.unwrap().unwrap();
    assert_eq!(stored, r.findings);
}
