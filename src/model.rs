// src/model.rs
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Raw search hit as returned by a source adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub url: String,
    pub source: String, // site/outlet label reported by the result
    pub time: String,   // source-reported, best effort
    #[serde(default)]
    pub description: String,
}

impl RawItem {
    pub fn into_finding(self, keyword: &str) -> Finding {
        Finding {
            title: self.title,
            url: self.url,
            source: self.source,
            time: self.time,
            description: self.description,
            keyword: keyword.to_string(),
        }
    }
}

/// One discovered content item. `url` is the identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub title: String,
    pub url: String,
    pub source: String,
    pub time: String,
    #[serde(default)]
    pub description: String,
    pub keyword: String,
}

/// Per-day aggregate, always derived from that day's findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatisticsRecord {
    pub total_findings: usize,
    pub sources_count: usize,
    pub keywords_count: usize,
    #[serde(default)]
    pub keyword_stats: BTreeMap<String, usize>,
}

impl StatisticsRecord {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let sources: BTreeSet<&str> = findings.iter().map(|f| f.source.as_str()).collect();
        let mut keyword_stats = BTreeMap::new();
        for f in findings {
            *keyword_stats.entry(f.keyword.clone()).or_insert(0) += 1;
        }
        Self {
            total_findings: findings.len(),
            sources_count: sources.len(),
            keywords_count: keyword_stats.len(),
            keyword_stats,
        }
    }
}

/// On-disk findings record for one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub findings: Vec<Finding>,
    pub last_updated: DateTime<Local>,
}

/// On-disk statistics record for one date, stored next to (not inside) the findings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStatistics {
    pub date: NaiveDate,
    pub statistics: StatisticsRecord,
    pub last_updated: DateTime<Local>,
}

/// Payload handed to notifiers and the report renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportPayload {
    pub date: NaiveDate,
    pub keywords: Vec<String>,
    pub findings: Vec<Finding>,
    pub statistics: StatisticsRecord,
}

#[cfg(test)]
pub(crate) fn finding(title: &str, url: &str, source: &str, keyword: &str) -> Finding {
    Finding {
        title: title.into(),
        url: url.into(),
        source: source.into(),
        time: "2025-03-01 08:00:00".into(),
        description: String::new(),
        keyword: keyword.into(),
    }
}
