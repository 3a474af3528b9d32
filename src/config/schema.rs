use crate::session::{DEFAULT_MAX_COMMANDS, DEFAULT_SESSION_TTL_SECS};
use crate::util::sync_directory;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,
}

// ── Relay ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Directory holding the session map and per-session files
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Override for the session map location (defaults to `<data_dir>/session-map.json`)
    #[serde(default)]
    pub session_map_path: Option<String>,
    /// tmux target used when the notifier is not running inside tmux
    #[serde(default = "default_target")]
    pub default_target: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    #[serde(default = "default_max_commands")]
    pub max_commands: u32,
    /// Upper bound for one injection, and for each tmux call within it
    #[serde(default = "default_injection_timeout")]
    pub injection_timeout_secs: u64,
    /// Pause before capturing the pane to confirm delivery
    #[serde(default = "default_verify_delay")]
    pub verify_delay_ms: u64,
    #[serde(default = "default_tmux_binary")]
    pub tmux_binary: String,
}

fn default_data_dir() -> String {
    "~/.taskping/data".into()
}
fn default_target() -> String {
    "claude-taskping".into()
}
fn default_session_ttl() -> i64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_max_commands() -> u32 {
    DEFAULT_MAX_COMMANDS
}
fn default_injection_timeout() -> u64 {
    8
}
fn default_verify_delay() -> u64 {
    300
}
fn default_tmux_binary() -> String {
    "tmux".into()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            session_map_path: None,
            default_target: default_target(),
            session_ttl_secs: default_session_ttl(),
            max_commands: default_max_commands(),
            injection_timeout_secs: default_injection_timeout(),
            verify_delay_ms: default_verify_delay(),
            tmux_binary: default_tmux_binary(),
        }
    }
}

impl RelayConfig {
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn session_map_path(&self) -> PathBuf {
        match self.session_map_path.as_deref() {
            Some(path) if !path.trim().is_empty() => expand_path(path),
            _ => self.data_dir().join("session-map.json"),
        }
    }

    pub fn injection_timeout(&self) -> Duration {
        Duration::from_secs(self.injection_timeout_secs.max(1))
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

// ── Channels ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

impl ChannelsConfig {
    pub const NAMES: [&'static str; 2] = ["slack", "email"];

    fn enabled_flag(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "slack" => Some(&mut self.slack.enabled),
            "email" => Some(&mut self.email.enabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Incoming-webhook URL; takes precedence over the bot token for sending
    #[serde(default)]
    pub webhook: Option<String>,
    /// Bot token (`xoxb-...`); required for command relay
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_slack_username")]
    pub username: String,
    #[serde(default = "default_slack_icon")]
    pub icon_emoji: String,
}

fn default_slack_username() -> String {
    "Claude-Code-Remote".into()
}
fn default_slack_icon() -> String {
    ":robot_face:".into()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook: None,
            token: None,
            channel: None,
            username: default_slack_username(),
            icon_emoji: default_slack_icon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    /// SMTP server port (default: 587 for STARTTLS)
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Use TLS for SMTP (default: true)
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// From address; falls back to `username` when empty
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_true() -> bool {
    true
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_tls: true,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: String::new(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Config {
    /// Load `~/.taskping/config.toml`, writing defaults on first run.
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Self::load_from(&home.join(".taskping").join("config.toml"))
    }

    /// Load from an explicit path, writing defaults there if it does not exist.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            Self::read_file(config_path)?
        } else {
            let config = Config {
                config_path: config_path.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// The file's contents alone, with no environment overrides applied.
    fn read_file(config_path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let mut config: Config =
            toml::from_str(&contents).context("Failed to parse config file")?;
        config.config_path = config_path.to_path_buf();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var("TASKPING_DATA_DIR") {
            self.relay.data_dir = dir;
        }
        if let Some(path) = var("SESSION_MAP_PATH") {
            self.relay.session_map_path = Some(path);
        }
        if let Some(target) = var("TASKPING_TMUX_SESSION") {
            self.relay.default_target = target;
        }
        if let Some(secs) = var("TASKPING_INJECTION_TIMEOUT").and_then(|v| v.parse::<u64>().ok())
        {
            if secs > 0 {
                self.relay.injection_timeout_secs = secs;
            }
        }

        if let Some(webhook) = var("SLACK_WEBHOOK_URL") {
            self.channels.slack.webhook = Some(webhook);
        }
        if let Some(token) = var("SLACK_BOT_TOKEN") {
            self.channels.slack.token = Some(token);
        }
        if let Some(channel) = var("SLACK_CHANNEL") {
            self.channels.slack.channel = Some(channel);
        }

        if let Some(host) = var("SMTP_HOST") {
            self.channels.email.smtp_host = host;
        }
        if let Some(user) = var("SMTP_USER") {
            self.channels.email.username = user;
        }
        if let Some(pass) = var("SMTP_PASS") {
            self.channels.email.password = pass;
        }
        if let Some(to) = var("EMAIL_TO") {
            self.channels.email.to = to;
        }
    }

    /// Flip a channel's `enabled` flag and persist. Returns the new state.
    ///
    /// The flag is flipped on a fresh read of the file so that values taken
    /// from the environment (tokens, passwords) never end up on disk.
    pub fn toggle_channel(&mut self, name: &str) -> Result<bool> {
        let mut on_disk = if self.config_path.exists() {
            Self::read_file(&self.config_path)?
        } else {
            Config {
                config_path: self.config_path.clone(),
                ..Config::default()
            }
        };
        let flag = on_disk
            .channels
            .enabled_flag(name)
            .ok_or_else(|| anyhow::anyhow!("Channel \"{name}\" not found"))?;
        *flag = !*flag;
        let enabled = *flag;
        on_disk.save()?;

        if let Some(live) = self.channels.enabled_flag(name) {
            *live = enabled;
        }
        tracing::info!(channel = name, enabled, "channel toggled");
        Ok(enabled)
    }

    /// Serialize `self` verbatim. Call it on a config read without env overrides.
    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path).with_context(|| {
                format!(
                    "Failed to create config backup before atomic replace: {}",
                    backup_path.display()
                )
            })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            if had_existing_config && backup_path.exists() {
                let _ = fs::copy(&backup_path, &self.config_path);
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).with_context(|| {
            format!("Failed to fsync config directory: {}", parent_dir.display())
        })?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path);
        }

        Ok(())
    }
}
