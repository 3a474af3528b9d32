//! Delivery of a command into the tmux pane bound to a relay token.
//!
//! tmux is the only delivery path. When the target session is gone the
//! injection fails; there is no keystroke-simulation or editor-automation
//! path to fall back on.

use super::tmux::TmuxRunner;
use crate::session::{SessionStore, StoreError};
use crate::util::truncate_with_ellipsis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lines of scrollback captured when checking that the pane took the input.
const VERIFY_SCROLLBACK_LINES: &str = "-50";

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("no relay session for token {0}")]
    SessionMissing(String),
    #[error("tmux session '{target}' is not running: {detail}")]
    TargetNotRunning { target: String, detail: String },
    #[error("tmux rejected input for '{target}': {detail}")]
    SendRejected { target: String, detail: String },
    #[error("could not verify delivery to '{target}': {detail}")]
    VerificationFailed { target: String, detail: String },
    #[error("tmux did not respond within {secs}s")]
    Timeout { secs: u64 },
    #[error("failed to run tmux: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Failure reported by a non-tmux backend, carried verbatim.
    #[error("{0}")]
    Backend(String),
}

/// Proof of delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionReceipt {
    /// tmux target the command went to.
    pub session: String,
    /// Whether the command text was seen in the pane afterwards.
    pub echoed: bool,
}

#[async_trait]
pub trait TerminalInjector: Send + Sync {
    /// Deliver `command` to the terminal bound to `token`. Makes exactly one
    /// attempt; retry policy belongs to the caller.
    async fn inject_command_full(
        &self,
        token: &str,
        command: &str,
    ) -> Result<InjectionReceipt, InjectionError>;
}

/// Injects through `tmux send-keys`.
pub struct TmuxInjector {
    store: Arc<dyn SessionStore>,
    tmux: Arc<dyn TmuxRunner>,
    verify_delay: Duration,
}

impl TmuxInjector {
    pub fn new(store: Arc<dyn SessionStore>, tmux: Arc<dyn TmuxRunner>) -> Self {
        Self {
            store,
            tmux,
            verify_delay: Duration::from_millis(300),
        }
    }

    /// How long to let the pane settle before capturing it.
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    async fn ensure_alive(&self, target: &str) -> Result<(), InjectionError> {
        let output = self.tmux.run(&["has-session", "-t", target]).await?;
        if output.success {
            Ok(())
        } else {
            Err(InjectionError::TargetNotRunning {
                target: target.to_string(),
                detail: output.failure_detail("tmux session not found"),
            })
        }
    }

    async fn send(&self, target: &str, args: &[&str]) -> Result<(), InjectionError> {
        let mut full = vec!["send-keys", "-t", target];
        full.extend_from_slice(args);
        let output = self.tmux.run(&full).await?;
        if output.success {
            Ok(())
        } else {
            Err(InjectionError::SendRejected {
                target: target.to_string(),
                detail: output.failure_detail("send-keys failed"),
            })
        }
    }

    /// Capture the pane after sending. Only confirms the pane is still there
    /// and readable; whether the command itself succeeds is not our concern.
    async fn verify(&self, target: &str, command: &str) -> Result<bool, InjectionError> {
        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }
        let output = self
            .tmux
            .run(&["capture-pane", "-p", "-t", target, "-S", VERIFY_SCROLLBACK_LINES])
            .await?;
        if !output.success {
            return Err(InjectionError::VerificationFailed {
                target: target.to_string(),
                detail: output.failure_detail("capture-pane failed"),
            });
        }
        let first_line = command.lines().next().unwrap_or_default().trim();
        Ok(!first_line.is_empty() && output.stdout.contains(first_line))
    }
}

#[async_trait]
impl TerminalInjector for TmuxInjector {
    async fn inject_command_full(
        &self,
        token: &str,
        command: &str,
    ) -> Result<InjectionReceipt, InjectionError> {
        let session = self
            .store
            .get(token)?
            .ok_or_else(|| InjectionError::SessionMissing(token.to_string()))?;
        let target = session.target_session.as_str();

        self.ensure_alive(target).await?;

        // Clear whatever is half-typed at the prompt, then type the command
        // literally and press Enter.
        self.send(target, &["C-u"]).await?;
        self.send(target, &["-l", "--", command]).await?;
        self.send(target, &["C-m"]).await?;

        let echoed = self.verify(target, command).await?;
        if echoed {
            tracing::debug!(token = %token, session = %target, "injected command visible in pane");
        } else {
            tracing::debug!(
                token = %token,
                session = %target,
                command = %truncate_with_ellipsis(command, 60),
                "injected command not visible in pane capture"
            );
        }

        Ok(InjectionReceipt {
            session: target.to_string(),
            echoed,
        })
    }
}
