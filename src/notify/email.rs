use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Notifier;
use crate::config::EmailSettings;
use crate::error::NotifyError;
use crate::model::ReportPayload;
use crate::report;

/// SMTP over implicit TLS (port 465 by default).
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn from_settings(s: &EmailSettings) -> Result<Self, NotifyError> {
        if s.smtp_server.trim().is_empty() {
            return Err(NotifyError::Config("email.smtp_server is empty".into()));
        }
        let creds = Credentials::new(s.username.clone(), s.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&s.smtp_server)
            .map_err(|e| NotifyError::Config(format!("smtp relay {}: {e}", s.smtp_server)))?
            .port(s.smtp_port)
            .credentials(creds)
            .build();
        let from = s
            .sender
            .parse()
            .map_err(|e| NotifyError::Config(format!("email.sender `{}`: {e}", s.sender)))?;
        Ok(Self { mailer, from })
    }

    fn build_message(&self, receivers: &[String], report: &ReportPayload) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(report::subject(report));
        for r in receivers {
            let to: Mailbox = r
                .parse()
                .map_err(|e| NotifyError::Build(format!("receiver `{r}`: {e}")))?;
            builder = builder.to(to);
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                report::render_text(report),
                report::render_html(report),
            ))
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send_report(&self, receivers: &[String], report: &ReportPayload) -> Result<(), NotifyError> {
        if receivers.is_empty() {
            return Err(NotifyError::Config("no email receivers".into()));
        }
        let msg = self.build_message(receivers, report)?;
        self.mailer
            .send(msg)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}
