use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::Notifier;
use crate::error::NotifyError;
use crate::model::ReportPayload;
use crate::report;

/// Chat-style webhook (Slack/Discord/Feishu compatible `text` + `content` fields).
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    content: &'a str,
    date: String,
    total_findings: usize,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn requires_receivers(&self) -> bool {
        false
    }

    async fn send_report(&self, _receivers: &[String], report: &ReportPayload) -> Result<(), NotifyError> {
        let text = report::render_text(report);
        let payload = WebhookPayload {
            text: &text,
            content: &text,
            date: report.date.to_string(),
            total_findings: report.statistics.total_findings,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => NotifyError::Http(e.to_string()),
                },
                Err(e) => NotifyError::Transport(e.to_string()),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(attempt, error = %err, "webhook attempt failed, retrying");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}
