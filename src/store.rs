// src/store.rs
//! # Content Store
//! Date-keyed JSON persistence of findings and statistics.
//!
//! Layout under the data directory:
//! - `<YYYY-MM-DD>.json`: [`DailyRecord`]
//! - `stats_<YYYY-MM-DD>.json`: [`DailyStatistics`]
//!
//! Every write goes to a temp file in the same directory and is renamed over
//! the target, so a reader sees either the old or the new record, never a
//! partial one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Duration, Local, NaiveDate};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::error::StoreError;
use crate::model::{DailyRecord, DailyStatistics, Finding, StatisticsRecord};

pub const DEFAULT_DATA_DIR: &str = "data";
const STATS_PREFIX: &str = "stats_";

/// Dates of the trailing window `[end - days + 1, end]`, ascending.
pub fn window_dates(end: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..i64::from(days))
        .rev()
        .map(|i| end - Duration::days(i))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn findings_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{date}.json"))
    }

    fn stats_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{STATS_PREFIX}{date}.json"))
    }

    /// Overwrite the findings record for `date`.
    ///
    /// Rewriting identical findings leaves the file untouched, `last_updated`
    /// included, so repeated saves produce the same on-disk state. An existing
    /// record that cannot be read is replaced.
    pub async fn save_findings(&self, date: NaiveDate, findings: &[Finding]) -> Result<(), StoreError> {
        match self.load_findings(date).await {
            Ok(Some(existing)) if existing == findings => {
                tracing::debug!(%date, "findings unchanged, skipping write");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%date, error = %e, "existing findings unreadable, overwriting"),
        }
        let record = DailyRecord {
            date,
            findings: findings.to_vec(),
            last_updated: Local::now(),
        };
        write_json(&self.findings_path(date), &record).await?;
        tracing::info!(%date, count = findings.len(), "findings saved");
        Ok(())
    }

    /// `None` when nothing was ever saved for `date`; `Some(vec![])` for an empty day.
    pub async fn load_findings(&self, date: NaiveDate) -> Result<Option<Vec<Finding>>, StoreError> {
        let path = self.findings_path(date);
        let Some(record) = read_json::<DailyRecord>(&path).await? else {
            return Ok(None);
        };
        check_date(&path, date, record.date)?;
        Ok(Some(record.findings))
    }

    pub async fn save_statistics(&self, date: NaiveDate, stats: &StatisticsRecord) -> Result<(), StoreError> {
        match self.load_statistics(date).await {
            Ok(Some(existing)) if &existing == stats => {
                tracing::debug!(%date, "statistics unchanged, skipping write");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%date, error = %e, "existing statistics unreadable, overwriting"),
        }
        let record = DailyStatistics {
            date,
            statistics: stats.clone(),
            last_updated: Local::now(),
        };
        write_json(&self.stats_path(date), &record).await?;
        tracing::info!(%date, total = stats.total_findings, "statistics saved");
        Ok(())
    }

    pub async fn load_statistics(&self, date: NaiveDate) -> Result<Option<StatisticsRecord>, StoreError> {
        let path = self.stats_path(date);
        let Some(record) = read_json::<DailyStatistics>(&path).await? else {
            return Ok(None);
        };
        check_date(&path, date, record.date)?;
        Ok(Some(record.statistics))
    }

    /// Union of the findings in `[end - window_days + 1, end]`, grouped by date ascending.
    /// Absent dates are skipped.
    pub async fn recent_findings(&self, end: NaiveDate, window_days: u32) -> Result<Vec<Finding>, StoreError> {
        let mut out = Vec::new();
        for date in window_dates(end, window_days) {
            if let Some(mut v) = self.load_findings(date).await? {
                out.append(&mut v);
            }
        }
        Ok(out)
    }

    /// Same as [`recent_findings`](Self::recent_findings) ending today (local time).
    pub async fn get_recent_findings(&self, window_days: u32) -> Result<Vec<Finding>, StoreError> {
        self.recent_findings(Local::now().date_naive(), window_days).await
    }

    /// Delete records whose date (taken from the file name) is more than
    /// `retention_days` before `today`. Unrecognised files are left alone.
    /// Returns the number of files removed.
    pub async fn cleanup_old_data(&self, today: NaiveDate, retention_days: u32) -> Result<usize, StoreError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        let mut removed = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = entry.path();
            let Some(date) = record_date(&path) else {
                continue;
            };
            if (today - date).num_days() <= i64::from(retention_days) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(path = %path.display(), %date, "removed expired record");
                }
                // another cleanup got there first
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Ok(removed)
    }
}

/// Record date encoded in a store file name, if it is one of ours.
fn record_date(path: &Path) -> Option<NaiveDate> {
    if path.extension().and_then(|s| s.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let stem = stem.strip_prefix(STATS_PREFIX).unwrap_or(stem);
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

fn check_date(path: &Path, expected: NaiveDate, found: NaiveDate) -> Result<(), StoreError> {
    if expected == found {
        Ok(())
    } else {
        Err(StoreError::InvalidRecord {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StoreError::serde(path, e))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::serde(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::finding;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn window_is_ascending_and_inclusive() {
        let w = window_dates(d(2025, 3, 3), 3);
        assert_eq!(w, vec![d(2025, 3, 1), d(2025, 3, 2), d(2025, 3, 3)]);
        assert!(window_dates(d(2025, 3, 3), 0).is_empty());
    }

    #[test]
    fn record_date_recognises_both_kinds() {
        assert_eq!(record_date(Path::new("data/2025-03-01.json")), Some(d(2025, 3, 1)));
        assert_eq!(record_date(Path::new("data/stats_2025-03-01.json")), Some(d(2025, 3, 1)));
        assert_eq!(record_date(Path::new("data/notes.json")), None);
        assert_eq!(record_date(Path::new("data/2025-03-01.json.tmp")), None);
    }

    #[tokio::test]
    async fn absent_differs_from_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let day = d(2025, 3, 1);
        assert_eq!(store.load_findings(day).await.unwrap(), None);
        assert_eq!(store.load_statistics(day).await.unwrap(), None);

        store.save_findings(day, &[]).await.unwrap();
        assert_eq!(store.load_findings(day).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn save_overwrites_instead_of_appending() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let day = d(2025, 3, 1);
        store.save_findings(day, &[finding("a", "u1", "s", "k")]).await.unwrap();
        store.save_findings(day, &[finding("b", "u2", "s", "k")]).await.unwrap();
        let got = store.load_findings(day).await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].url, "u2");
    }

    #[tokio::test]
    async fn identical_save_keeps_file_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let day = d(2025, 3, 1);
        let findings = vec![finding("a", "u1", "s", "k")];
        store.save_findings(day, &findings).await.unwrap();
        let first = std::fs::read(tmp.path().join("2025-03-01.json")).unwrap();
        store.save_findings(day, &findings).await.unwrap();
        let second = std::fs::read(tmp.path().join("2025-03-01.json")).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error_not_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        std::fs::write(tmp.path().join("2025-03-01.json"), "{not json").unwrap();
        let err = store.load_findings(d(2025, 3, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialize { .. }));
    }

    #[tokio::test]
    async fn save_replaces_unreadable_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let day = d(2025, 3, 5);
        std::fs::write(tmp.path().join("2025-03-05.json"), "{truncated").unwrap();
        std::fs::write(tmp.path().join("stats_2025-03-05.json"), "").unwrap();

        let findings = vec![finding("a", "u1", "s", "k")];
        let stats = StatisticsRecord::from_findings(&findings);
        store.save_findings(day, &findings).await.unwrap();
        store.save_statistics(day, &stats).await.unwrap();

        assert_eq!(store.load_findings(day).await.unwrap(), Some(findings));
        assert_eq!(store.load_statistics(day).await.unwrap(), Some(stats));
    }

    #[tokio::test]
    async fn recent_findings_skips_absent_days() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        store.save_findings(d(2025, 3, 1), &[finding("a", "u1", "s", "k")]).await.unwrap();
        store.save_findings(d(2025, 3, 3), &[finding("b", "u2", "s", "k")]).await.unwrap();
        store.save_findings(d(2025, 2, 20), &[finding("c", "u3", "s", "k")]).await.unwrap();

        let got = store.recent_findings(d(2025, 3, 3), 7).await.unwrap();
        let urls: Vec<_> = got.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(urls, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn cleanup_uses_record_date_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        let stats = StatisticsRecord::default();
        for day in [d(2025, 1, 1), d(2025, 2, 28), d(2025, 3, 1)] {
            store.save_findings(day, &[]).await.unwrap();
            store.save_statistics(day, &stats).await.unwrap();
        }
        std::fs::write(tmp.path().join("README.txt"), "keep me").unwrap();

        let removed = store.cleanup_old_data(d(2025, 3, 1), 30).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.load_findings(d(2025, 1, 1)).await.unwrap(), None);
        assert!(store.load_findings(d(2025, 2, 28)).await.unwrap().is_some());
        assert!(tmp.path().join("README.txt").exists());

        assert_eq!(store.cleanup_old_data(d(2025, 3, 1), 30).await.unwrap(), 0);
    }
}
