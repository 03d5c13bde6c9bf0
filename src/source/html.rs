// src/source/html.rs
//! Search-engine result pages scraped with CSS selectors.
//!
//! Each result block matched by `selectors.result` yields one [`RawItem`]:
//! the first `title` link gives title + URL, the other selectors are optional
//! and fall back to the result host (source) or the fetch time (time).

use async_trait::async_trait;
use chrono::Local;
use metrics::counter;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use super::{normalize_text, search_url, SourceAdapter};
use crate::config::HtmlSelectors;
use crate::error::{ConfigError, FetchError};
use crate::model::RawItem;

struct Compiled {
    result: Selector,
    title: Selector,
    description: Selector,
    source: Selector,
    time: Selector,
}

impl Compiled {
    fn new(s: &HtmlSelectors) -> Result<Self, ConfigError> {
        let parse = |field: &'static str, css: &str| {
            Selector::parse(css).map_err(|e| ConfigError::Invalid {
                field,
                reason: format!("`{css}`: {e}"),
            })
        };
        Ok(Self {
            result: parse("selectors.result", &s.result)?,
            title: parse("selectors.title", &s.title)?,
            description: parse("selectors.description", &s.description)?,
            source: parse("selectors.source", &s.source)?,
            time: parse("selectors.time", &s.time)?,
        })
    }
}

pub struct HtmlSearchAdapter {
    name: String,
    selectors: Compiled,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url_template: String,
        client: reqwest::Client,
    },
}

impl HtmlSearchAdapter {
    pub fn from_url(
        name: &str,
        url_template: &str,
        selectors: HtmlSelectors,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            selectors: Compiled::new(&selectors)?,
            mode: Mode::Http {
                url_template: url_template.to_string(),
                client,
            },
        })
    }

    /// Serve the same page for every keyword.
    pub fn from_fixture(name: &str, html: &str, selectors: HtmlSelectors) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            selectors: Compiled::new(&selectors)?,
            mode: Mode::Fixture(html.to_string()),
        })
    }

    fn parse_page(&self, html: &str, base: Option<&Url>) -> Vec<RawItem> {
        let document = Html::parse_document(html);
        let fetched_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let sel = &self.selectors;

        let mut out = Vec::new();
        for block in document.select(&sel.result) {
            let Some(link) = block.select(&sel.title).next() else {
                tracing::debug!(source = %self.name, "result without title link, skipped");
                continue;
            };
            let title = element_text(&link);
            let Some(url) = link.value().attr("href").and_then(|h| resolve(base, h)) else {
                continue;
            };
            if title.is_empty() {
                continue;
            }

            let description = first_text(&block, &sel.description).unwrap_or_default();
            let source = first_text(&block, &sel.source)
                .or_else(|| Url::parse(&url).ok().and_then(|u| u.host_str().map(str::to_string)))
                .unwrap_or_else(|| self.name.clone());
            let time = first_text(&block, &sel.time).unwrap_or_else(|| fetched_at.clone());

            out.push(RawItem {
                title,
                url,
                source,
                time,
                description,
            });
        }
        out
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_text(block: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    block
        .select(sel)
        .map(|el| element_text(&el))
        .find(|t| !t.is_empty())
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match base {
        Some(b) => b.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

#[async_trait]
impl SourceAdapter for HtmlSearchAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, keyword: &str) -> Result<Vec<RawItem>, FetchError> {
        let items = match &self.mode {
            Mode::Fixture(html) => self.parse_page(html, None),
            Mode::Http { url_template, client } => {
                let url = search_url(url_template, keyword);
                let base = Url::parse(&url).map_err(|e| FetchError::Network(format!("bad url {url}: {e}")))?;
                let body = client
                    .get(base.clone())
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                self.parse_page(&body, Some(&base))
            }
        };
        if items.is_empty() {
            tracing::warn!(source = %self.name, %keyword, "result page yielded no items");
        }
        counter!("monitor_fetched_items_total", "source" => self.name.clone())
            .increment(items.len() as u64);
        Ok(items)
    }
}
