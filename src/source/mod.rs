// src/source/mod.rs
//! Source adapters: one [`SourceAdapter`] per search source, looked up by
//! name through a [`SourceRegistry`].

pub mod html;
pub mod rss;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::{SourceKind, SourceSettings};
use crate::error::{ConfigError, FetchError};
use crate::model::RawItem;

pub use html::HtmlSearchAdapter;
pub use rss::RssSearchAdapter;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key, e.g. "bing".
    fn name(&self) -> &str;

    /// Search one keyword. Failures must be errors, never an empty `Ok`.
    async fn search(&self, keyword: &str) -> Result<Vec<RawItem>, FetchError>;
}

/// Shared HTTP client for all adapters.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "http client builder failed, using defaults");
            reqwest::Client::new()
        })
}

/// Fill the `{query}` placeholder with the URL-encoded keyword.
pub fn search_url(template: &str, keyword: &str) -> String {
    template.replace("{query}", &urlencoding::encode(keyword))
}

#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Build HTTP-backed adapters for every configured source definition.
    pub fn from_settings(defs: &[SourceSettings], client: reqwest::Client) -> Result<Self, ConfigError> {
        let mut reg = Self::new();
        for def in defs {
            let adapter: Arc<dyn SourceAdapter> = match def.kind {
                SourceKind::Rss => Arc::new(RssSearchAdapter::from_url(&def.name, &def.url, client.clone())),
                SourceKind::Html => Arc::new(HtmlSearchAdapter::from_url(
                    &def.name,
                    &def.url,
                    def.selectors.clone().unwrap_or_default(),
                    client.clone(),
                )?),
            };
            reg.register(adapter);
        }
        Ok(reg)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.adapters.keys().cloned().collect();
        v.sort();
        v
    }

    /// Run one search with an upper time bound.
    pub async fn search(&self, source: &str, keyword: &str, timeout: Duration) -> Result<Vec<RawItem>, FetchError> {
        let adapter = self
            .get(source)
            .ok_or_else(|| FetchError::UnknownSource(source.to_string()))?;

        let t0 = std::time::Instant::now();
        let res = tokio::time::timeout(timeout, adapter.search(keyword))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?;
        histogram!("monitor_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        res
    }
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 4) Length cap: 1000 chars
    if out.chars().count() > 1000 {
        out = out.chars().take(1000).collect();
    }
    out
}
