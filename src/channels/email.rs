use super::notification::Notification;
use super::registrar::SessionRegistrar;
use super::traits::NotificationChannel;
use crate::config::EmailConfig;
use crate::relay::FailureAlert;
use crate::session::Session;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::fmt::Write as _;

/// Email channel: SMTP only. The relay token rides in the subject so a
/// reply can be routed back to its session.
pub struct EmailChannel {
    config: EmailConfig,
    registrar: SessionRegistrar,
}

impl EmailChannel {
    pub fn new(config: EmailConfig, registrar: SessionRegistrar) -> Self {
        Self { config, registrar }
    }

    fn from_address(&self) -> &str {
        if self.config.from.trim().is_empty() {
            &self.config.username
        } else {
            &self.config.from
        }
    }

    fn mailboxes(&self) -> Result<(Mailbox, Mailbox)> {
        let from = self
            .from_address()
            .parse()
            .with_context(|| format!("Invalid sender address: {}", self.from_address()))?;
        let to = self
            .config
            .to
            .parse()
            .with_context(|| format!("Invalid recipient address: {}", self.config.to))?;
        Ok((from, to))
    }

    fn subject_for(notification: &Notification, session: &Session) -> String {
        format!(
            "[taskping] {} - {} #{}",
            notification.title, notification.project, session.token
        )
    }

    fn body_for(notification: &Notification, session: &Session) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "{}", notification.title);
        let _ = writeln!(body);
        let _ = writeln!(body, "Project: {}", notification.project);
        let _ = writeln!(body, "Status:  {}", notification.kind.status_label());
        let _ = writeln!(body, "Session: #{}", session.token);
        let _ = writeln!(body);
        if let Some(question) = notification
            .metadata
            .user_question
            .as_deref()
            .filter(|q| !q.trim().is_empty())
        {
            let _ = writeln!(body, "Your question:\n{question}\n");
        }
        let _ = writeln!(body, "Response:\n{}\n", notification.response_text());
        let _ = writeln!(
            body,
            "Reply to this email with your next command; keep #{} in the subject.",
            session.token
        );
        let _ = writeln!(
            body,
            "Session ID: {} (expires in {}h)",
            session.session_id,
            (session.expires_at - session.created_at) / 3600
        );
        body
    }

    fn build_notification(&self, notification: &Notification, session: &Session) -> Result<Message> {
        let (from, to) = self.mailboxes()?;
        Message::builder()
            .from(from)
            .to(to)
            .subject(Self::subject_for(notification, session))
            .body(Self::body_for(notification, session))
            .context("Failed to build notification email")
    }

    fn build_alert(&self, alert: &FailureAlert) -> Result<Message> {
        let (from, to) = self.mailboxes()?;
        Message::builder()
            .from(from)
            .to(to)
            .subject(alert.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                alert.text.clone(),
                alert.html.clone(),
            ))
            .context("Failed to build alert email")
    }

    fn create_smtp_transport(&self) -> Result<SmtpTransport> {
        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let transport = if self.config.smtp_tls {
            SmtpTransport::relay(&self.config.smtp_host)?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build()
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
                .port(self.config.smtp_port)
                .credentials(creds)
                .build()
        };
        Ok(transport)
    }

    /// lettre's SMTP transport is blocking; keep it off the runtime threads.
    async fn transmit(&self, email: Message) -> Result<()> {
        let transport = self.create_smtp_transport()?;
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .context("SMTP send task panicked")?
            .context("SMTP send failed")?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        self.validate_config().map_err(|e| anyhow::anyhow!(e))?;

        let session = self.registrar.register(self.name(), notification)?;
        let sent = match self.build_notification(notification, &session) {
            Ok(email) => self.transmit(email).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::error!(token = %session.token, error = %e, "Failed to send email notification");
            self.registrar.rollback(&session);
            return Err(e);
        }

        tracing::info!(
            session_id = %session.session_id,
            token = %session.token,
            to = %self.config.to,
            "Email notification sent"
        );
        Ok(())
    }

    async fn send_alert(&self, alert: &FailureAlert) -> Result<()> {
        self.validate_config().map_err(|e| anyhow::anyhow!(e))?;
        let email = self.build_alert(alert)?;
        self.transmit(email).await?;
        tracing::info!(token = %alert.token, to = %self.config.to, "Failure alert emailed");
        Ok(())
    }

    fn supports_relay(&self) -> bool {
        true
    }

    fn validate_config(&self) -> Result<(), String> {
        if self.config.smtp_host.trim().is_empty() {
            return Err("SMTP host is required".into());
        }
        if self.config.to.trim().is_empty() {
            return Err("Recipient email address is required".into());
        }
        if self.from_address().trim().is_empty() {
            return Err("Sender address (from or username) is required".into());
        }
        Ok(())
    }

    fn details(&self) -> Vec<(String, String)> {
        vec![
            (
                "smtp".into(),
                format!("{}:{}", self.config.smtp_host, self.config.smtp_port),
            ),
            ("to".into(), self.config.to.clone()),
        ]
    }
}
