//! Session types: the record binding a relay token to a tmux target, plus
//! the lifecycle state derived from it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default session lifetime: 24 hours.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;
/// Default number of commands a single token may relay.
pub const DEFAULT_MAX_COMMANDS: u32 = 10;

/// Stored lifecycle marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Waiting,
    Consumed,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Consumed => write!(f, "consumed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Effective state of a session at a given instant.
///
/// Unlike [`SessionStatus`] this also folds in the clock and the command
/// quota, so `Expired` and `Exhausted` are reported even when the stored
/// status has not been updated yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    Consumed,
    Expired,
    Exhausted,
}

impl SessionState {
    /// Whether a command may still be injected through this session.
    pub fn accepts_commands(self) -> bool {
        matches!(self, Self::Waiting | Self::Consumed)
    }
}

/// Short summary of the notification that created a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub project: String,
    pub message: String,
}

/// One outstanding relay opportunity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub session_id: String,
    /// tmux session (or `session:window.pane`) that receives injected commands.
    #[serde(rename = "tmuxSession")]
    pub target_session: String,
    pub cwd: PathBuf,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub command_count: u32,
    #[serde(default = "default_max_commands")]
    pub max_commands: u32,
    /// Channel that registered the session (`slack`, `email`, ...).
    #[serde(default, rename = "type")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationSummary>,
}

fn default_max_commands() -> u32 {
    DEFAULT_MAX_COMMANDS
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn quota_exhausted(&self) -> bool {
        self.command_count >= self.max_commands
    }

    pub fn state(&self, now: i64) -> SessionState {
        if self.status == SessionStatus::Expired || self.is_expired(now) {
            SessionState::Expired
        } else if self.quota_exhausted() {
            SessionState::Exhausted
        } else if self.status == SessionStatus::Consumed {
            SessionState::Consumed
        } else {
            SessionState::Waiting
        }
    }

    /// Apply a mutation in place.
    pub fn apply(&mut self, mutation: SessionMutation) {
        match mutation {
            SessionMutation::RecordCommand => {
                self.command_count = self.command_count.saturating_add(1);
                self.status = SessionStatus::Consumed;
            }
            SessionMutation::SetStatus(status) => self.status = status,
        }
    }
}

/// Everything a channel knows when it asks for a new session; the token,
/// id and timestamps are filled in at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDraft {
    pub target_session: String,
    pub cwd: PathBuf,
    pub channel: String,
    pub ttl_secs: i64,
    pub max_commands: u32,
    pub notification: Option<NotificationSummary>,
}

impl SessionDraft {
    pub fn new(target_session: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            target_session: target_session.into(),
            cwd: cwd.into(),
            channel: String::new(),
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_commands: DEFAULT_MAX_COMMANDS,
            notification: None,
        }
    }

    /// Materialize the draft. `expires_at` is fixed here and never moved.
    pub fn into_session(self, token: String, session_id: String, now: i64) -> Session {
        Session {
            token,
            session_id,
            target_session: self.target_session,
            cwd: self.cwd,
            created_at: now,
            expires_at: now + self.ttl_secs,
            status: SessionStatus::Waiting,
            command_count: 0,
            max_commands: self.max_commands,
            channel: self.channel,
            notification: self.notification,
        }
    }
}

/// Atomic update applied through [`super::SessionStore::touch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMutation {
    /// A command was delivered: bump the counter and mark the session consumed.
    RecordCommand,
    SetStatus(SessionStatus),
}
