//! Thin async wrapper around the `tmux` binary.

use super::injector::InjectionError;
use async_trait::async_trait;
use std::time::Duration;

/// Captured result of one tmux invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmuxOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl TmuxOutput {
    /// Best human-readable explanation of a failed call.
    pub fn failure_detail(&self, fallback: &str) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            fallback.to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs tmux subcommands. Kept behind a trait so the injector can be driven
/// by a scripted runner in tests.
#[async_trait]
pub trait TmuxRunner: Send + Sync {
    async fn run(&self, args: &[&str]) -> Result<TmuxOutput, InjectionError>;
}

/// Runs the real `tmux` binary, each call bounded by `timeout`.
pub struct SystemTmux {
    binary: String,
    timeout: Duration,
}

impl SystemTmux {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TmuxRunner for SystemTmux {
    async fn run(&self, args: &[&str]) -> Result<TmuxOutput, InjectionError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| InjectionError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(InjectionError::Spawn)?;

        Ok(TmuxOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Name of the tmux session this process runs inside, if any.
///
/// Only asks tmux when `$TMUX` is set; outside tmux there is nothing to detect.
pub async fn current_session(runner: &dyn TmuxRunner) -> Option<String> {
    std::env::var_os("TMUX")?;
    let output = runner
        .run(&["display-message", "-p", "#S"])
        .await
        .ok()
        .filter(|o| o.success)?;
    let name = output.stdout.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_detail_prefers_stderr() {
        let output = TmuxOutput {
            success: false,
            stdout: String::new(),
            stderr: "can't find session: work\n".into(),
        };
        assert_eq!(output.failure_detail("fallback"), "can't find session: work");
    }

    #[test]
    fn failure_detail_falls_back_when_stderr_empty() {
        let output = TmuxOutput::default();
        assert_eq!(output.failure_detail("no output"), "no output");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let tmux = SystemTmux::new("/nonexistent/taskping-tmux", Duration::from_secs(2));
        let err = tmux.run(&["has-session"]).await.unwrap_err();
        assert!(matches!(err, InjectionError::Spawn(_)));
    }

    #[tokio::test]
    async fn slow_binary_times_out() {
        let tmux = SystemTmux::new("sleep", Duration::from_millis(100));
        let err = tmux.run(&["5"]).await.unwrap_err();
        assert!(matches!(err, InjectionError::Timeout { .. }));
    }
}
