// src/notify/mod.rs
pub mod email;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::{ConfigError, NotifyError};
use crate::model::ReportPayload;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether delivery is addressed to the configured receivers (email) or
    /// to a fixed destination (webhook).
    fn requires_receivers(&self) -> bool {
        true
    }

    async fn send_report(&self, receivers: &[String], report: &ReportPayload) -> Result<(), NotifyError>;
}

/// Fan-out over every configured channel. Succeeds when at least one channel does.
#[derive(Default, Clone)]
pub struct NotifierMux {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Email when `[email]` is present, webhook when `[webhook]` is present.
    /// A broken channel config is logged and that channel left out.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(email) = &cfg.email {
            match EmailNotifier::from_settings(email) {
                Ok(n) => notifiers.push(Arc::new(n)),
                Err(e) => tracing::warn!(error = %e, "email notifier disabled"),
            }
        }
        if let Some(hook) = &cfg.webhook {
            notifiers.push(Arc::new(WebhookNotifier::new(hook.url.clone())));
        }
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for NotifierMux {
    fn name(&self) -> &'static str {
        "mux"
    }

    /// True only when every channel needs receivers.
    fn requires_receivers(&self) -> bool {
        self.notifiers.iter().all(|n| n.requires_receivers())
    }

    async fn send_report(&self, receivers: &[String], report: &ReportPayload) -> Result<(), NotifyError> {
        if self.notifiers.is_empty() {
            return Err(NotifyError::Config("no notification channel configured".into()));
        }
        let mut failures = Vec::new();
        for n in &self.notifiers {
            if receivers.is_empty() && n.requires_receivers() {
                let e = ConfigError::Missing("email.receivers");
                tracing::warn!(channel = n.name(), date = %report.date, error = %e, "channel skipped");
                failures.push(format!("{}: {e}", n.name()));
                continue;
            }
            match n.send_report(receivers, report).await {
                Ok(()) => tracing::info!(channel = n.name(), date = %report.date, "report delivered"),
                Err(e) => {
                    tracing::warn!(channel = n.name(), date = %report.date, error = %e, "report delivery failed");
                    failures.push(format!("{}: {e}", n.name()));
                }
            }
        }
        if failures.len() == self.notifiers.len() {
            Err(NotifyError::AllFailed(failures.join("; ")))
        } else {
            Ok(())
        }
    }
}
