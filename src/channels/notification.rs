use crate::session::NotificationSummary;
use crate::util::project_name;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happened in the assistant session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Completed,
    Waiting,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Waiting => "waiting",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Completed => "🎉",
            Self::Waiting => "⏳",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Completed => "Claude Code Task Completed",
            Self::Waiting => "Claude Code Waiting for Input",
        }
    }

    pub fn status_label(self) -> &'static str {
        match self {
            Self::Completed => "Task Completed",
            Self::Waiting => "Waiting for Input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_response: Option<String>,
}

/// An outbound notification, independent of channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub project: String,
    /// Working directory of the assistant session being reported on.
    pub cwd: PathBuf,
    /// tmux target that replies should be injected into; channels fall back
    /// to the configured default when unset.
    pub target_session: Option<String>,
    pub metadata: NotificationMetadata,
}

impl Notification {
    pub fn new(kind: NotificationType, cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let message = match kind {
            NotificationType::Completed => "Task completed successfully",
            NotificationType::Waiting => "Waiting for your input",
        };
        Self {
            kind,
            title: kind.title().to_string(),
            message: message.to_string(),
            project: project_name(&cwd),
            cwd,
            target_session: None,
            metadata: NotificationMetadata::default(),
        }
    }

    /// Canned notification used by channel self-tests.
    pub fn test_for(channel: &str) -> Self {
        let mut notification = Self::new(NotificationType::Completed, std::env::temp_dir());
        notification.title = "Claude-Code-Remote Test".into();
        notification.message = format!(
            "This is a test notification to verify {channel} integration is working properly."
        );
        notification.project = "Claude-Code-Remote-Test".into();
        notification.metadata = NotificationMetadata {
            user_question: Some(format!("Test {channel} integration")),
            claude_response: Some(format!("{channel} integration test successful!")),
        };
        notification
    }

    /// The response text to show: the assistant's reply if known, else the message.
    pub fn response_text(&self) -> &str {
        self.metadata
            .claude_response
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.message)
    }

    pub fn summary(&self) -> NotificationSummary {
        NotificationSummary {
            kind: self.kind.as_str().to_string(),
            project: self.project.clone(),
            message: self.message.clone(),
        }
    }
}
