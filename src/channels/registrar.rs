//! Session registration done by channels at send time.

use super::notification::Notification;
use crate::config::RelayConfig;
use crate::session::{register_session, Session, SessionDraft, SessionStore};
use crate::util::unix_now;

use anyhow::Context;
use std::sync::Arc;

/// Creates the relay session that a notification's token refers to, and
/// removes it again when the notification never reached the human.
#[derive(Clone)]
pub struct SessionRegistrar {
    store: Arc<dyn SessionStore>,
    default_target: String,
    ttl_secs: i64,
    max_commands: u32,
}

impl SessionRegistrar {
    pub fn new(store: Arc<dyn SessionStore>, relay: &RelayConfig) -> Self {
        Self {
            store,
            default_target: relay.default_target.clone(),
            ttl_secs: relay.session_ttl_secs,
            max_commands: relay.max_commands,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn register(&self, channel: &str, notification: &Notification) -> anyhow::Result<Session> {
        let target = notification
            .target_session
            .clone()
            .unwrap_or_else(|| self.default_target.clone());
        let draft = SessionDraft {
            target_session: target,
            cwd: notification.cwd.clone(),
            channel: channel.to_string(),
            ttl_secs: self.ttl_secs,
            max_commands: self.max_commands,
            notification: Some(notification.summary()),
        };
        register_session(self.store.as_ref(), draft, unix_now())
            .context("Failed to register relay session")
    }

    /// Undo [`Self::register`] after a failed send. Errors are logged only:
    /// the send error is what the caller reports.
    pub fn rollback(&self, session: &Session) {
        match self.store.remove(&session.token) {
            Ok(_) => tracing::debug!(
                token = %session.token,
                session_id = %session.session_id,
                "relay session rolled back"
            ),
            Err(e) => tracing::warn!(
                token = %session.token,
                error = %e,
                "failed to roll back relay session"
            ),
        }
    }
}
