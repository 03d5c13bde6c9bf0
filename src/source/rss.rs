// src/source/rss.rs
use async_trait::async_trait;
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use super::{normalize_text, search_url, SourceAdapter};
use crate::error::FetchError;
use crate::model::RawItem;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    // news feeds carry the outlet here, plain RSS has nothing
    #[serde(rename = "source")]
    outlet: Option<String>,
}

/// RFC 2822 `pubDate` rendered as `YYYY-MM-DD HH:MM:SS` (UTC). Unparseable
/// dates are passed through untouched.
fn format_pub_date(ts: &str) -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| dt.to_offset(UtcOffset::UTC).format(&fmt).ok())
        .unwrap_or_else(|| ts.trim().to_string())
}

/// Keyword search over an RSS endpoint (e.g. Bing News with `format=rss`).
pub struct RssSearchAdapter {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url_template: String,
        client: reqwest::Client,
    },
}

impl RssSearchAdapter {
    /// Serve the same XML for every keyword.
    pub fn from_fixture(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: &str, url_template: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Http {
                url_template: url_template.to_string(),
                client,
            },
        }
    }

    fn parse_items(&self, xml: &str) -> Result<Vec<RawItem>, FetchError> {
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean).map_err(|e| FetchError::Parse(format!("rss: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let url = it.link.as_deref().unwrap_or_default().trim().to_string();
            if title.is_empty() || url.is_empty() {
                continue;
            }
            out.push(RawItem {
                title,
                url,
                source: it
                    .outlet
                    .map(|s| normalize_text(&s))
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| self.name.clone()),
                time: it.pub_date.as_deref().map(format_pub_date).unwrap_or_default(),
                description: normalize_text(it.description.as_deref().unwrap_or_default()),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for RssSearchAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, keyword: &str) -> Result<Vec<RawItem>, FetchError> {
        let items = match &self.mode {
            Mode::Fixture(s) => self.parse_items(s)?,
            Mode::Http { url_template, client } => {
                let url = search_url(url_template, keyword);
                let body = client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                self.parse_items(&body)?
            }
        };
        counter!("monitor_fetched_items_total", "source" => self.name.clone())
            .increment(items.len() as u64);
        tracing::debug!(source = %self.name, %keyword, count = items.len(), "rss search done");
        Ok(items)
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
