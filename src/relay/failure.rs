//! Operator alerts for failed injections.
//!
//! Reporting never fails from the caller's point of view: channel errors are
//! logged and dropped, because the dispatcher has already settled on `false`.

use crate::channels::NotificationChannel;

use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to act on a failed injection by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    pub token: String,
    pub target_session: String,
    pub cwd: PathBuf,
    pub command: String,
    pub error: String,
}

/// Rendered alert, ready for any channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureAlert {
    pub token: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

const GUIDANCE: &str = "This system uses tmux-only execution for maximum reliability. \
Commands are never retried through keyboard simulation or editor automation.";

const TROUBLESHOOTING: [&str; 3] = [
    "Check that the tmux session is running: tmux has-session -t <session>",
    "Recreate or reattach the session, then reply again with the same token",
    "Or run the command by hand in the working directory shown above",
];

impl FailureAlert {
    pub fn compose(ctx: &FailureContext) -> Self {
        let cwd = ctx.cwd.display().to_string();
        let subject = format!("[taskping] Command Execution Failed - {}", ctx.token);

        let mut text = String::new();
        let _ = writeln!(text, "Command execution failed for token {}.", ctx.token);
        let _ = writeln!(text);
        let _ = writeln!(text, "Command:           {}", ctx.command);
        let _ = writeln!(text, "Error:             {}", ctx.error);
        let _ = writeln!(text, "Target session:    {}", ctx.target_session);
        let _ = writeln!(text, "Working directory: {cwd}");
        let _ = writeln!(text);
        let _ = writeln!(text, "{GUIDANCE}");
        let _ = writeln!(text);
        let _ = writeln!(text, "Troubleshooting:");
        for step in TROUBLESHOOTING {
            let _ = writeln!(text, "  - {}", step.replace("<session>", &ctx.target_session));
        }

        let mut html = String::new();
        html.push_str("<h2>Command Execution Failed</h2>\n");
        let _ = writeln!(html, "<p>Token: <code>{}</code></p>", escape_html(&ctx.token));
        let _ = writeln!(html, "<p>Command:</p>\n<pre>{}</pre>", escape_html(&ctx.command));
        let _ = writeln!(html, "<p>Error:</p>\n<pre>{}</pre>", escape_html(&ctx.error));
        html.push_str("<table>\n");
        let _ = writeln!(
            html,
            "<tr><td>Target session</td><td><code>{}</code></td></tr>",
            escape_html(&ctx.target_session)
        );
        let _ = writeln!(
            html,
            "<tr><td>Working directory</td><td><code>{}</code></td></tr>",
            escape_html(&cwd)
        );
        html.push_str("</table>\n");
        let _ = writeln!(html, "<p>{GUIDANCE}</p>");
        html.push_str("<ul>\n");
        for step in TROUBLESHOOTING {
            let step = step.replace("<session>", &ctx.target_session);
            let _ = writeln!(html, "<li>{}</li>", escape_html(&step));
        }
        html.push_str("</ul>\n");

        Self {
            token: ctx.token.clone(),
            subject,
            text,
            html,
        }
    }
}

/// Escape text-node content. Quotes are left alone so commands read verbatim.
fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, ctx: &FailureContext);
}

/// Sends failure alerts through every enabled notification channel.
pub struct FailureNotifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl FailureNotifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl FailureReporter for FailureNotifier {
    async fn report(&self, ctx: &FailureContext) {
        let alert = FailureAlert::compose(ctx);
        let mut delivered = 0usize;

        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            match channel.send_alert(&alert).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    token = %ctx.token,
                    channel = channel.name(),
                    error = %e,
                    "failed to deliver injection failure alert"
                ),
            }
        }

        if delivered == 0 {
            tracing::warn!(
                token = %ctx.token,
                "injection failure alert reached no channel"
            );
        } else {
            tracing::info!(
                token = %ctx.token,
                channels = delivered,
                "injection failure alert sent"
            );
        }
    }
}
