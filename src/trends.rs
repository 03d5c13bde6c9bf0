// src/trends.rs
//! # Trend Analyzer
//! Read-only aggregation over the Content Store: per-day totals, keyword and
//! source series, and per-keyword insights (top sources, co-occurring title
//! tokens).
//!
//! Dates without a findings record are skipped entirely, so a sparse history
//! never shows up as fabricated zero points. A day whose statistics record is
//! missing (crash between the two writes) is recomputed from its findings.
//! All series are returned in ascending date order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{Finding, StatisticsRecord};
use crate::store::{window_dates, ContentStore};

const TOP_SOURCES: usize = 5;
const TOP_RELATED: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CountPoint {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub count: usize,
    pub statistics: StatisticsRecord,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TrendReport {
    pub daily_findings: Vec<DailyPoint>,
    pub keyword_trends: BTreeMap<String, Vec<CountPoint>>,
    pub source_trends: BTreeMap<String, Vec<CountPoint>>,
}

impl TrendReport {
    pub fn is_empty(&self) -> bool {
        self.daily_findings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct KeywordInsight {
    pub total_mentions: usize,
    pub daily_mentions: Vec<CountPoint>,
    pub top_sources: Vec<NamedCount>,
    pub related_keywords: Vec<NamedCount>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_keywords: usize,
    pub total_findings: usize,
    pub period: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisReport {
    pub summary: ReportSummary,
    pub trends: TrendReport,
    pub keyword_insights: BTreeMap<String, KeywordInsight>,
}

/// Candidate keyword tokens of a title: alphanumeric runs of at least two
/// characters, lowercased, in order of appearance.
pub fn extract_tokens(text: &str) -> Vec<String> {
    static RE_TOKEN: OnceCell<Regex> = OnceCell::new();
    let re = RE_TOKEN.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("token regex"));
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() >= 2)
        .collect()
}

#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    store: ContentStore,
}

impl TrendAnalyzer {
    pub fn new(store: ContentStore) -> Self {
        Self { store }
    }

    /// Present days of the window, most recent first.
    async fn present_days(&self, end: NaiveDate, window_days: u32) -> Result<Vec<(NaiveDate, Vec<Finding>)>, StoreError> {
        let mut out = Vec::new();
        for date in window_dates(end, window_days).into_iter().rev() {
            if let Some(findings) = self.store.load_findings(date).await? {
                out.push((date, findings));
            }
        }
        Ok(out)
    }

    pub async fn analyze_trends(&self, end: NaiveDate, window_days: u32) -> Result<TrendReport, StoreError> {
        let mut report = TrendReport::default();

        for (date, findings) in self.present_days(end, window_days).await? {
            let statistics = match self.store.load_statistics(date).await? {
                Some(s) => s,
                None => {
                    tracing::debug!(%date, "statistics missing, recomputing from findings");
                    StatisticsRecord::from_findings(&findings)
                }
            };

            for (keyword, &count) in &statistics.keyword_stats {
                report
                    .keyword_trends
                    .entry(keyword.clone())
                    .or_default()
                    .push(CountPoint { date, count });
            }

            let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
            for f in &findings {
                *per_source.entry(f.source.as_str()).or_insert(0) += 1;
            }
            for (source, count) in per_source {
                report
                    .source_trends
                    .entry(source.to_string())
                    .or_default()
                    .push(CountPoint { date, count });
            }

            report.daily_findings.push(DailyPoint {
                date,
                count: findings.len(),
                statistics,
            });
        }

        report.daily_findings.reverse();
        for series in report
            .keyword_trends
            .values_mut()
            .chain(report.source_trends.values_mut())
        {
            series.reverse();
        }
        Ok(report)
    }

    pub async fn keyword_insights(&self, keyword: &str, end: NaiveDate, window_days: u32) -> Result<KeywordInsight, StoreError> {
        let days = self.present_days(end, window_days).await?;
        Ok(insight_from_days(keyword, &days))
    }

    pub async fn generate_report(&self, end: NaiveDate, window_days: u32) -> Result<AnalysisReport, StoreError> {
        let trends = self.analyze_trends(end, window_days).await?;
        let days = self.present_days(end, window_days).await?;

        let keywords: BTreeSet<&str> = days
            .iter()
            .flat_map(|(_, fs)| fs.iter().map(|f| f.keyword.as_str()))
            .collect();

        let keyword_insights: BTreeMap<String, KeywordInsight> = keywords
            .iter()
            .map(|k| (k.to_string(), insight_from_days(k, &days)))
            .collect();

        let summary = ReportSummary {
            total_keywords: keyword_insights.len(),
            total_findings: keyword_insights.values().map(|i| i.total_mentions).sum(),
            period: format!("last {window_days} days"),
        };

        Ok(AnalysisReport {
            summary,
            trends,
            keyword_insights,
        })
    }
}

/// `days` must be most recent first; first-seen tie-breaking follows that order.
fn insight_from_days(keyword: &str, days: &[(NaiveDate, Vec<Finding>)]) -> KeywordInsight {
    let keyword_lc = keyword.to_lowercase();
    let mut insight = KeywordInsight::default();
    let mut sources: HashMap<&str, usize> = HashMap::new();
    // token -> (count, first-seen index)
    let mut related: HashMap<String, (usize, usize)> = HashMap::new();

    for (date, findings) in days {
        let matching: Vec<&Finding> = findings.iter().filter(|f| f.keyword == keyword).collect();
        insight.total_mentions += matching.len();
        insight.daily_mentions.push(CountPoint {
            date: *date,
            count: matching.len(),
        });

        for f in matching {
            *sources.entry(f.source.as_str()).or_insert(0) += 1;
            for token in extract_tokens(&f.title) {
                if token == keyword_lc {
                    continue;
                }
                let next_idx = related.len();
                related.entry(token).or_insert((0, next_idx)).0 += 1;
            }
        }
    }
    insight.daily_mentions.reverse();

    let mut top_sources: Vec<NamedCount> = sources
        .into_iter()
        .map(|(name, count)| NamedCount {
            name: name.to_string(),
            count,
        })
        .collect();
    top_sources.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    top_sources.truncate(TOP_SOURCES);
    insight.top_sources = top_sources;

    let mut related: Vec<(String, usize, usize)> = related
        .into_iter()
        .map(|(token, (count, idx))| (token, count, idx))
        .collect();
    related.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));
    insight.related_keywords = related
        .into_iter()
        .take(TOP_RELATED)
        .map(|(name, count, _)| NamedCount { name, count })
        .collect();

    insight
}
