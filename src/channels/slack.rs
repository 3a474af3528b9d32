use super::notification::Notification;
use super::registrar::SessionRegistrar;
use super::traits::NotificationChannel;
use crate::config::SlackConfig;
use crate::relay::FailureAlert;
use crate::session::Session;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const SLACK_API_BASE: &str = "https://slack.com/api";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack channel: incoming webhook for plain notifications, bot token for
/// `chat.postMessage` and command relay.
pub struct SlackChannel {
    config: SlackConfig,
    registrar: SessionRegistrar,
    client: reqwest::Client,
    api_base: String,
}

impl SlackChannel {
    pub fn new(config: SlackConfig, registrar: SessionRegistrar) -> Self {
        Self {
            config,
            registrar,
            client: reqwest::Client::new(),
            api_base: SLACK_API_BASE.to_string(),
        }
    }

    /// Point Web API calls somewhere other than slack.com.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn webhook(&self) -> Option<&str> {
        self.config.webhook.as_deref().filter(|w| !w.trim().is_empty())
    }

    fn bot_token(&self) -> Option<&str> {
        self.config.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    fn channel_name(&self) -> Option<&str> {
        self.config.channel.as_deref().filter(|c| !c.trim().is_empty())
    }

    fn build_message(&self, notification: &Notification, session: &Session) -> Value {
        let kind = notification.kind;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("{} {}", kind.emoji(), notification.title),
                    "emoji": true
                }
            }),
            json!({
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Project:*\n{}", notification.project) },
                    { "type": "mrkdwn", "text": format!("*Time:*\n{timestamp}") },
                    { "type": "mrkdwn", "text": format!("*Session:*\n#{}", session.token) },
                    { "type": "mrkdwn", "text": format!("*Status:*\n{}", kind.status_label()) }
                ]
            }),
        ];

        if let Some(question) = notification
            .metadata
            .user_question
            .as_deref()
            .filter(|q| !q.trim().is_empty())
        {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*📝 Your Question:*\n{question}") }
            }));
        }

        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*🤖 Claude's Response:*\n{}", notification.response_text())
            }
        }));

        if self.supports_relay() {
            blocks.push(json!({ "type": "divider" }));
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*💡 Continue Conversation:*\nReply with `#{} <command>` to send a command to the running session",
                        session.token
                    )
                }
            }));
        }

        blocks.push(json!({
            "type": "context",
            "elements": [{
                "type": "mrkdwn",
                "text": format!(
                    "🔒 Session ID: `{}` | Auto-expires in {}h | 🤖 {}",
                    session.session_id,
                    (session.expires_at - session.created_at) / 3600,
                    self.config.username
                )
            }]
        }));

        json!({
            "username": self.config.username,
            "icon_emoji": self.config.icon_emoji,
            "text": format!("{} {} - {}", kind.emoji(), notification.title, notification.project),
            "blocks": blocks
        })
    }

    /// Post a message body, preferring the webhook over the Web API.
    async fn post(&self, body: Value) -> anyhow::Result<()> {
        if let Some(webhook) = self.webhook() {
            return self.post_webhook(webhook, &body).await;
        }
        let token = self
            .bot_token()
            .ok_or_else(|| anyhow::anyhow!("Slack webhook URL or bot token not configured"))?;
        self.post_api(token, body).await
    }

    async fn post_webhook(&self, url: &str, body: &Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(url)
            .timeout(HTTP_TIMEOUT)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            anyhow::bail!("Slack webhook failed ({status}): {text}");
        }
        Ok(())
    }

    async fn post_api(&self, token: &str, mut body: Value) -> anyhow::Result<()> {
        body["channel"] = Value::String(self.channel_name().unwrap_or("#general").to_string());

        let resp = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(token)
            .timeout(HTTP_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));

        if !status.is_success() {
            anyhow::bail!("Slack chat.postMessage failed ({status}): {text}");
        }

        // Slack returns 200 for most app-level errors; check JSON "ok" field
        let parsed: Value = serde_json::from_str(&text).unwrap_or_default();
        if parsed.get("ok") != Some(&Value::Bool(true)) {
            let err = parsed
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            anyhow::bail!("Slack chat.postMessage failed: {err}");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.validate_config().map_err(|e| anyhow::anyhow!(e))?;

        let session = self.registrar.register(self.name(), notification)?;
        let body = self.build_message(notification, &session);

        if let Err(e) = self.post(body).await {
            tracing::error!(token = %session.token, error = %e, "Failed to send Slack notification");
            self.registrar.rollback(&session);
            return Err(e);
        }

        tracing::info!(
            session_id = %session.session_id,
            token = %session.token,
            "Slack notification sent"
        );
        Ok(())
    }

    async fn send_alert(&self, alert: &FailureAlert) -> anyhow::Result<()> {
        let body = json!({
            "username": self.config.username,
            "icon_emoji": self.config.icon_emoji,
            "text": format!("⚠️ *{}*\n```{}```", alert.subject, alert.text)
        });
        self.post(body).await
    }

    fn supports_relay(&self) -> bool {
        self.bot_token().is_some()
    }

    fn validate_config(&self) -> Result<(), String> {
        if self.webhook().is_none() && self.bot_token().is_none() {
            return Err("Either Slack webhook URL or bot token is required".into());
        }
        if self.bot_token().is_some() && self.channel_name().is_none() {
            return Err("Slack channel is required when using bot token".into());
        }
        Ok(())
    }

    fn details(&self) -> Vec<(String, String)> {
        let configured = |set: bool| if set { "configured" } else { "not configured" };
        vec![
            ("webhook".into(), configured(self.webhook().is_some()).into()),
            ("token".into(), configured(self.bot_token().is_some()).into()),
            (
                "channel".into(),
                self.channel_name().unwrap_or("not configured").into(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::NotificationType;
    use crate::config::RelayConfig;
    use crate::relay::FailureContext;
    use crate::session::{InMemorySessionStore, SessionStore};
    use std::path::PathBuf;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slack(config: SlackConfig) -> (SlackChannel, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let registrar = SessionRegistrar::new(store.clone(), &RelayConfig::default());
        (SlackChannel::new(config, registrar), store)
    }

    fn webhook_config(url: String) -> SlackConfig {
        SlackConfig {
            enabled: true,
            webhook: Some(url),
            ..SlackConfig::default()
        }
    }

    fn bot_config() -> SlackConfig {
        SlackConfig {
            enabled: true,
            token: Some("xoxb-test".into()),
            channel: Some("#builds".into()),
            ..SlackConfig::default()
        }
    }

    fn notification() -> Notification {
        let mut n = Notification::new(NotificationType::Completed, "/work/my-app");
        n.metadata.user_question = Some("Run the tests".into());
        n.metadata.claude_response = Some("All green".into());
        n
    }

    #[test]
    fn validation_requires_webhook_or_token() {
        let (ch, _) = slack(SlackConfig::default());
        assert_eq!(
            ch.validate_config().unwrap_err(),
            "Either Slack webhook URL or bot token is required"
        );
    }

    #[test]
    fn validation_requires_channel_with_token() {
        let (ch, _) = slack(SlackConfig {
            token: Some("xoxb-test".into()),
            ..SlackConfig::default()
        });
        assert_eq!(
            ch.validate_config().unwrap_err(),
            "Slack channel is required when using bot token"
        );
    }

    #[test]
    fn relay_needs_bot_token() {
        let (webhook_only, _) = slack(webhook_config("https://hooks.example/x".into()));
        assert!(!webhook_only.supports_relay());
        let (bot, _) = slack(bot_config());
        assert!(bot.supports_relay());
    }

    #[test]
    fn status_reports_configuration() {
        let (ch, _) = slack(bot_config());
        let status = ch.status();
        assert!(status.configured);
        assert!(status.supports_relay);
        assert!(status
            .details
            .contains(&("webhook".to_string(), "not configured".to_string())));
        assert!(status
            .details
            .contains(&("channel".to_string(), "#builds".to_string())));
    }

    #[test]
    fn message_layout_carries_token_and_response() {
        let (ch, store) = slack(bot_config());
        let n = notification();
        let session = SessionRegistrar::new(store, &RelayConfig::default())
            .register("slack", &n)
            .unwrap();

        let msg = ch.build_message(&n, &session);
        assert_eq!(msg["username"], "Claude-Code-Remote");
        assert_eq!(msg["icon_emoji"], ":robot_face:");
        assert_eq!(msg["text"], "🎉 Claude Code Task Completed - my-app");

        let rendered = msg["blocks"].to_string();
        assert!(rendered.contains(&format!("#{}", session.token)));
        assert!(rendered.contains("Run the tests"));
        assert!(rendered.contains("All green"));
        assert!(rendered.contains("Continue Conversation"));
        assert!(rendered.contains(&session.session_id));
        assert!(rendered.contains("Auto-expires in 24h"));
    }

    #[tokio::test]
    async fn webhook_send_registers_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let (ch, store) = slack(webhook_config(format!("{}/hook", server.uri())));
        assert!(ch.send(&notification()).await.unwrap());

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].channel, "slack");
        assert_eq!(sessions[0].cwd, PathBuf::from("/work/my-app"));
    }

    #[tokio::test]
    async fn webhook_failure_rolls_back_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let (ch, store) = slack(webhook_config(format!("{}/hook", server.uri())));
        let err = ch.send(&notification()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_send_uses_bearer_and_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(serde_json::json!({ "channel": "#builds" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let (ch, store) = slack(bot_config());
        let ch = ch.with_api_base(server.uri());
        assert!(ch.send(&notification()).await.unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_not_ok_rolls_back_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ok": false, "error": "channel_not_found" })),
            )
            .mount(&server)
            .await;

        let (ch, store) = slack(bot_config());
        let ch = ch.with_api_base(server.uri());
        let err = ch.send(&notification()).await.unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_sends_nothing() {
        let (ch, store) = slack(SlackConfig {
            enabled: true,
            ..SlackConfig::default()
        });
        assert!(ch.send(&notification()).await.is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn alert_goes_through_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (ch, _) = slack(webhook_config(format!("{}/hook", server.uri())));
        let alert = FailureAlert::compose(&FailureContext {
            token: "FAIL1234".into(),
            target_session: "work".into(),
            cwd: PathBuf::from("/work"),
            command: "npm test".into(),
            error: "connection refused".into(),
        });
        ch.send_alert(&alert).await.unwrap();
    }
}
