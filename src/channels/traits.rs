use super::notification::Notification;
use crate::relay::{parse_reply, FailureAlert, RelayDispatcher};

use async_trait::async_trait;
use serde::Serialize;

/// Point-in-time health summary of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub enabled: bool,
    pub configured: bool,
    pub supports_relay: bool,
    /// Channel-specific key/value facts (`webhook: configured`, ...)
    pub details: Vec<(String, String)>,
    pub error: Option<String>,
}

/// Core notification channel trait: implement for any delivery backend.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Deliver a notification unconditionally. Callers normally go through
    /// [`NotificationChannel::send`], which honours the enabled flag.
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;

    /// Deliver an injection failure alert.
    async fn send_alert(&self, alert: &FailureAlert) -> anyhow::Result<()>;

    /// Whether replies received on this channel can be relayed to a terminal.
    fn supports_relay(&self) -> bool {
        false
    }

    fn validate_config(&self) -> Result<(), String> {
        Ok(())
    }

    /// Extra facts shown in [`ChannelStatus::details`].
    fn details(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn status(&self) -> ChannelStatus {
        let validation = self.validate_config();
        ChannelStatus {
            name: self.name().to_string(),
            enabled: self.is_enabled(),
            configured: validation.is_ok(),
            supports_relay: self.supports_relay(),
            details: self.details(),
            error: validation.err(),
        }
    }

    /// Send if enabled. `Ok(false)` means the channel was skipped.
    async fn send(&self, notification: &Notification) -> anyhow::Result<bool> {
        if !self.is_enabled() {
            tracing::debug!(channel = self.name(), "channel disabled, skipping");
            return Ok(false);
        }
        self.validate_config().map_err(|e| anyhow::anyhow!(e))?;
        self.deliver(notification).await?;
        Ok(true)
    }

    /// Send a canned notification to prove the channel works end to end.
    async fn test(&self) -> bool {
        let notification = Notification::test_for(self.name());
        match self.deliver(&notification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(channel = self.name(), error = %e, "channel test failed");
                false
            }
        }
    }

    /// Relay a human reply received on this channel.
    async fn handle_command(&self, reply: &str, relay: &RelayDispatcher) -> bool {
        if !self.supports_relay() {
            tracing::warn!(channel = self.name(), "channel does not support command relay");
            return false;
        }
        relay_reply(self.name(), reply, relay).await
    }
}

/// Parse `reply` and hand it to the dispatcher.
pub async fn relay_reply(channel: &str, reply: &str, relay: &RelayDispatcher) -> bool {
    let Some(parsed) = parse_reply(reply) else {
        tracing::warn!(channel, "reply does not carry a token and a command");
        return false;
    };
    tracing::info!(channel, token = %parsed.token, "received command reply");
    relay.inject_command_remote(&parsed.token, &parsed.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{
        FailureContext, FailureReporter, InjectionError, InjectionReceipt, TerminalInjector,
    };
    use crate::session::{InMemorySessionStore, SessionDraft};
    use crate::util::unix_now;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct DummyChannel {
        enabled: bool,
        relay: bool,
        delivered: Mutex<Vec<String>>,
    }

    impl DummyChannel {
        fn new(enabled: bool, relay: bool) -> Self {
            Self {
                enabled,
                relay,
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for DummyChannel {
        fn name(&self) -> &str {
            "dummy"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
            self.delivered.lock().push(notification.title.clone());
            Ok(())
        }

        async fn send_alert(&self, _alert: &FailureAlert) -> anyhow::Result<()> {
            Ok(())
        }

        fn supports_relay(&self) -> bool {
            self.relay
        }
    }

    struct EchoInjector;

    #[async_trait]
    impl TerminalInjector for EchoInjector {
        async fn inject_command_full(
            &self,
            _token: &str,
            _command: &str,
        ) -> Result<InjectionReceipt, InjectionError> {
            Ok(InjectionReceipt {
                session: "work".into(),
                echoed: true,
            })
        }
    }

    struct SilentReporter;

    #[async_trait]
    impl FailureReporter for SilentReporter {
        async fn report(&self, _ctx: &FailureContext) {}
    }

    fn dispatcher_with(token: &str) -> RelayDispatcher {
        let store = Arc::new(InMemorySessionStore::new());
        store.insert(SessionDraft::new("work", "/tmp").into_session(
            token.into(),
            "id".into(),
            unix_now(),
        ));
        RelayDispatcher::new(store, Arc::new(EchoInjector), Arc::new(SilentReporter))
    }

    #[tokio::test]
    async fn disabled_channel_skips_send() {
        let channel = DummyChannel::new(false, false);
        let sent = channel
            .send(&Notification::test_for("dummy"))
            .await
            .unwrap();
        assert!(!sent);
        assert!(channel.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn enabled_channel_delivers() {
        let channel = DummyChannel::new(true, false);
        assert!(channel.send(&Notification::test_for("dummy")).await.unwrap());
        assert_eq!(channel.delivered.lock().len(), 1);
    }

    #[test]
    fn default_status_reflects_flags() {
        let status = DummyChannel::new(true, true).status();
        assert_eq!(status.name, "dummy");
        assert!(status.enabled);
        assert!(status.configured);
        assert!(status.supports_relay);
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn handle_command_requires_relay_support() {
        let relay = dispatcher_with("ABCD1234");
        let channel = DummyChannel::new(true, false);
        assert!(!channel.handle_command("#ABCD1234 ls", &relay).await);
    }

    #[tokio::test]
    async fn handle_command_relays_parsed_reply() {
        let relay = dispatcher_with("ABCD1234");
        let channel = DummyChannel::new(true, true);
        assert!(channel.handle_command("#abcd1234 ls -la", &relay).await);
        assert!(!channel.handle_command("no token here", &relay).await);
    }
}
