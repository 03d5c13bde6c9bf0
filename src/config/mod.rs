// src/config/mod.rs
//! Application configuration: keywords, sources, schedule, retention and
//! notification settings. Loaded from TOML or JSON.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::Cadence;

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";
pub const ENV_SMTP_PASSWORD: &str = "SMTP_PASSWORD";

const DEFAULT_TOML_PATH: &str = "config/monitor.toml";
const DEFAULT_JSON_PATH: &str = "config/monitor.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorSettings,
    pub schedule: ScheduleSettings,
    pub email: Option<EmailSettings>,
    pub webhook: Option<WebhookSettings>,
    /// Adapter definitions; `monitor.sources` picks the enabled ones by name.
    pub sources: Vec<SourceSettings>,
    pub server: ServerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorSettings::default(),
            schedule: ScheduleSettings::default(),
            email: None,
            webhook: None,
            sources: default_source_defs(),
            server: ServerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub keywords: Vec<String>,
    pub sources: Vec<String>,
    pub dedup_window_days: u32,
    pub max_results: usize,
    pub retention_days: u32,
    pub fetch_timeout_secs: u64,
    pub politeness_delay_ms: u64,
    pub data_dir: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            sources: vec!["bing".into(), "baidu".into()],
            dedup_window_days: 7,
            max_results: 10,
            retention_days: 30,
            fetch_timeout_secs: 10,
            politeness_delay_ms: 2_000,
            data_dir: crate::store::DEFAULT_DATA_DIR.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Local time of day, `HH:MM`.
    pub time: String,
    pub cadence: Cadence,
    pub cleanup_time: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            time: "09:00".into(),
            cadence: Cadence::Daily,
            cleanup_time: "03:00".into(),
        }
    }
}

impl ScheduleSettings {
    pub fn run_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_time_of_day("schedule.time", &self.time)
    }

    pub fn cleanup_run_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_time_of_day("schedule.cleanup_time", &self.cleanup_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    /// `"ENV"` means: read from `SMTP_PASSWORD`.
    pub password: String,
    pub sender: String,
    #[serde(default)]
    pub receivers: Vec<String>,
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub name: String,
    pub kind: SourceKind,
    /// Search URL with a `{query}` placeholder.
    pub url: String,
    #[serde(default)]
    pub selectors: Option<HtmlSelectors>,
}

/// CSS selectors for result pages. Defaults follow Bing's web results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HtmlSelectors {
    pub result: String,
    pub title: String,
    pub description: String,
    pub source: String,
    pub time: String,
}

impl Default for HtmlSelectors {
    fn default() -> Self {
        Self {
            result: "li.b_algo".into(),
            title: "h2 a".into(),
            description: "div.b_caption p".into(),
            source: "div.b_attribution cite".into(),
            time: "div.b_attribution span".into(),
        }
    }
}

impl HtmlSelectors {
    pub fn baidu() -> Self {
        Self {
            result: r#"div[class*="result c-container"]"#.into(),
            title: "h3.t a".into(),
            description: r#"div[class*="c-abstract"], div[class*="c-span-last"]"#.into(),
            source: r#"span[class*="c-showurl"], span[class*="c-color-gray"]"#.into(),
            time: r#"span[class*="c-color-gray2"]"#.into(),
        }
    }
}

fn default_source_defs() -> Vec<SourceSettings> {
    vec![
        SourceSettings {
            name: "bing".into(),
            kind: SourceKind::Html,
            url: "https://www.bing.com/search?q={query}".into(),
            selectors: Some(HtmlSelectors::default()),
        },
        SourceSettings {
            name: "baidu".into(),
            kind: SourceKind::Html,
            url: "https://www.baidu.com/s?wd={query}".into(),
            selectors: Some(HtmlSelectors::baidu()),
        },
        SourceSettings {
            name: "bing-news".into(),
            kind: SourceKind::Rss,
            url: "https://www.bing.com/news/search?q={query}&format=rss".into(),
            selectors: None,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path. TOML or JSON, chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = Self::parse(&content, &ext)?;
        cfg.resolve_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $MONITOR_CONFIG_PATH
    /// 2) config/monitor.toml
    /// 3) config/monitor.json
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::Invalid {
                    field: ENV_CONFIG_PATH,
                    reason: format!("{} does not exist", pb.display()),
                });
            }
            return Self::load_from(&pb);
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Err(ConfigError::Missing("monitor config file"))
    }

    fn parse(s: &str, hint_ext: &str) -> Result<Self, ConfigError> {
        match hint_ext {
            "json" => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
            "toml" => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
            // Unknown extension: try TOML, then JSON
            _ => toml::from_str::<Self>(s)
                .or_else(|_| serde_json::from_str(s))
                .map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    fn resolve_env(&mut self) -> Result<(), ConfigError> {
        if let Some(email) = self.email.as_mut() {
            if email.password.trim().eq_ignore_ascii_case("env") {
                email.password = std::env::var(ENV_SMTP_PASSWORD)
                    .map_err(|_| ConfigError::Missing(ENV_SMTP_PASSWORD))?;
            }
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.monitor.keywords = clean_list(std::mem::take(&mut self.monitor.keywords));
        self.monitor.sources = clean_list(std::mem::take(&mut self.monitor.sources));

        if self.monitor.keywords.is_empty() {
            return Err(ConfigError::Missing("monitor.keywords"));
        }
        if self.monitor.sources.is_empty() {
            return Err(ConfigError::Missing("monitor.sources"));
        }
        if self.monitor.max_results == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.max_results",
                reason: "must be at least 1".into(),
            });
        }
        if self.monitor.dedup_window_days == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.dedup_window_days",
                reason: "must be at least 1".into(),
            });
        }
        self.schedule.run_time()?;
        self.schedule.cleanup_run_time()?;

        let defined: HashSet<&str> = self.sources.iter().map(|s| s.name.as_str()).collect();
        if let Some(missing) = self
            .monitor
            .sources
            .iter()
            .find(|name| !defined.contains(name.as_str()))
        {
            return Err(ConfigError::Invalid {
                field: "monitor.sources",
                reason: format!("no [[sources]] definition for `{missing}`"),
            });
        }
        Ok(())
    }

    /// Receivers for reports; empty when email is not configured.
    pub fn receivers(&self) -> Vec<String> {
        self.email
            .as_ref()
            .map(|e| e.receivers.clone())
            .unwrap_or_default()
    }
}

fn parse_time_of_day(field: &'static str, s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|e| ConfigError::Invalid {
            field,
            reason: format!("`{s}`: {e}"),
        })
}

/// Trim, drop empties, drop duplicates; keeps first-seen order.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
