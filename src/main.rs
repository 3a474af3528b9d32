#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use taskping::channels::{relay_reply, Notification, NotificationType};
use taskping::notifier::{DeliveryOutcome, Notifier};
use taskping::relay::{current_session, RelayDispatcher, SystemTmux, TmuxInjector, TmuxRunner};
use taskping::session::{is_lookup_token, FileSessionStore, SessionStore};
use taskping::util::{truncate_with_ellipsis, unix_now};
use taskping::{ChannelCommands, Config, SessionCommands};

/// `taskping` - ping a human when the assistant is done, relay their reply back.
#[derive(Parser, Debug)]
#[command(name = "taskping")]
#[command(version)]
#[command(about = "Task notifications with remote command relay into tmux.", long_about = None)]
struct Cli {
    /// Use this config file instead of ~/.taskping/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a notification through every enabled channel
    Notify {
        /// What happened
        #[arg(long = "type", value_enum, default_value_t = NotificationType::Completed)]
        kind: NotificationType,

        /// Message body (defaults to a per-type message)
        #[arg(long)]
        message: Option<String>,

        /// The question the human originally asked
        #[arg(long)]
        question: Option<String>,

        /// The assistant's final response
        #[arg(long)]
        response: Option<String>,

        /// Working directory of the assistant session (default: current dir)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// tmux target for replies (default: current tmux session, then config)
        #[arg(long)]
        session: Option<String>,
    },

    /// Inject a command into the terminal bound to a relay token
    Relay {
        /// Relay token
        token: String,

        /// Command to type into the terminal
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Parse a free-text reply ("#TOKEN command") and relay it
    Reply {
        /// Route through this channel's reply handling (slack, email)
        #[arg(long)]
        via: Option<String>,

        /// Reply text
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Inspect and maintain relay sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Manage notification channels
    Channels {
        #[command(subcommand)]
        command: ChannelCommands,
    },

    /// Show configuration and channel status
    Status,
}

/// Everything a command needs, wired from config.
struct App {
    config: Config,
    store: Arc<dyn SessionStore>,
    tmux: Arc<dyn TmuxRunner>,
    notifier: Notifier,
    dispatcher: RelayDispatcher,
}

impl App {
    fn build(config: Config) -> Self {
        let relay = &config.relay;
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::with_map_path(
            &relay.data_dir(),
            relay.session_map_path(),
        ));
        let tmux: Arc<dyn TmuxRunner> = Arc::new(SystemTmux::new(
            relay.tmux_binary.clone(),
            relay.injection_timeout(),
        ));
        let notifier = Notifier::from_config(&config, store.clone());
        let injector = TmuxInjector::new(store.clone(), tmux.clone())
            .with_verify_delay(relay.verify_delay());
        let dispatcher = RelayDispatcher::new(
            store.clone(),
            Arc::new(injector),
            Arc::new(notifier.failure_notifier()),
        )
        .with_injection_deadline(relay.injection_timeout());
        Self {
            config,
            store,
            tmux,
            notifier,
            dispatcher,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS.
    // This prevents the error: "could not automatically determine the process-level CryptoProvider"
    // when both aws-lc-rs and ring features are available (or neither is explicitly selected).
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO.
    // Logs go to stderr so command output on stdout stays scriptable.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_init()?,
    };
    let app = App::build(config);

    match cli.command {
        Commands::Notify {
            kind,
            message,
            question,
            response,
            cwd,
            session,
        } => {
            let cwd = match cwd {
                Some(cwd) => cwd,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            let mut notification = Notification::new(kind, cwd);
            if let Some(message) = message {
                notification.message = message;
            }
            notification.metadata.user_question = question;
            notification.metadata.claude_response = response;
            notification.target_session = match session {
                Some(target) => Some(target),
                None => current_session(app.tmux.as_ref()).await,
            };

            let report = app.notifier.notify(&notification).await;
            for delivery in &report.deliveries {
                match &delivery.outcome {
                    DeliveryOutcome::Delivered => println!("✅ {}: sent", delivery.channel),
                    DeliveryOutcome::Skipped => println!("   {}: disabled", delivery.channel),
                    DeliveryOutcome::Failed(e) => println!("❌ {}: {e}", delivery.channel),
                }
            }
            if report.delivered() == 0 {
                bail!("Notification was not delivered to any channel");
            }
            Ok(())
        }

        Commands::Relay { token, command } => {
            let command = command.join(" ");
            if app.dispatcher.inject_command_remote(&token, &command).await {
                println!("Command relayed to session {}", token.to_ascii_uppercase());
                Ok(())
            } else {
                bail!("Command relay failed for token {token}");
            }
        }

        Commands::Reply { via, text } => {
            let text = text.join(" ");
            let relayed = match via.as_deref() {
                Some(name) => {
                    let channel = app
                        .notifier
                        .channel(name)
                        .with_context(|| format!("Channel \"{name}\" not found"))?;
                    channel.handle_command(&text, &app.dispatcher).await
                }
                None => relay_reply("cli", &text, &app.dispatcher).await,
            };
            if relayed {
                println!("Reply relayed");
                Ok(())
            } else {
                bail!("Reply was not relayed");
            }
        }

        Commands::Sessions { command } => handle_session_command(command, app.store.as_ref()),

        Commands::Channels { command } => handle_channel_command(command, app).await,

        Commands::Status => {
            let relay = &app.config.relay;
            println!("📣 taskping Status");
            println!();
            println!("Version:        {}", env!("CARGO_PKG_VERSION"));
            println!("Config:         {}", app.config.config_path.display());
            println!("Data dir:       {}", relay.data_dir().display());
            println!("Session map:    {}", relay.session_map_path().display());
            println!("Default target: {}", relay.default_target);
            println!(
                "Current tmux:   {}",
                current_session(app.tmux.as_ref())
                    .await
                    .unwrap_or_else(|| "(not inside tmux)".into())
            );
            println!(
                "Injection:      timeout {}s, {} commands per token, sessions live {}h",
                relay.injection_timeout().as_secs(),
                relay.max_commands,
                relay.session_ttl_secs / 3600
            );

            let now = unix_now();
            let sessions = app.store.list()?;
            let live = sessions.iter().filter(|s| !s.is_expired(now)).count();
            println!("Sessions:       {live} live, {} expired", sessions.len() - live);

            println!();
            println!("Channels:");
            for status in app.notifier.statuses() {
                print_channel_status(&status);
            }
            Ok(())
        }
    }
}

fn handle_session_command(command: SessionCommands, store: &dyn SessionStore) -> Result<()> {
    match command {
        SessionCommands::List => {
            let now = unix_now();
            let mut sessions = store.list()?;
            if sessions.is_empty() {
                println!("No relay sessions.");
                return Ok(());
            }
            sessions.sort_by_key(|s| s.created_at);
            println!(
                "{:<9} {:<10} {:<24} {:>7}  {:<19}  {}",
                "TOKEN", "STATE", "TARGET", "USED", "EXPIRES", "PROJECT"
            );
            for s in sessions {
                let project = s
                    .notification
                    .as_ref()
                    .map(|n| n.project.clone())
                    .unwrap_or_else(|| taskping::util::project_name(&s.cwd));
                println!(
                    "{:<9} {:<10} {:<24} {:>7}  {:<19}  {}",
                    s.token,
                    format!("{:?}", s.state(now)).to_lowercase(),
                    truncate_with_ellipsis(&s.target_session, 21),
                    format!("{}/{}", s.command_count, s.max_commands),
                    format_timestamp(s.expires_at),
                    project
                );
            }
            Ok(())
        }
        SessionCommands::Sweep => {
            let removed = store.purge_expired(unix_now())?;
            info!(removed, "expired sessions swept");
            println!("Removed {removed} expired session(s).");
            Ok(())
        }
        SessionCommands::Remove { token } => {
            let token = token.trim().to_ascii_uppercase();
            if !is_lookup_token(&token) {
                bail!("Invalid token format: {token}");
            }
            if store.remove(&token)? {
                println!("Removed session {token}.");
            } else {
                println!("No session {token}; nothing to remove.");
            }
            Ok(())
        }
    }
}

async fn handle_channel_command(command: ChannelCommands, app: App) -> Result<()> {
    match command {
        ChannelCommands::List => {
            println!("Channels:");
            for channel in app.notifier.channels() {
                println!(
                    "  {} {}",
                    if channel.is_enabled() { "✅" } else { "❌" },
                    channel.name()
                );
            }
            println!();
            println!("Toggle with: taskping channels toggle <name>");
            Ok(())
        }
        ChannelCommands::Status => {
            for status in app.notifier.statuses() {
                print_channel_status(&status);
            }
            Ok(())
        }
        ChannelCommands::Test => {
            let results = app.notifier.test_all().await;
            if results.is_empty() {
                println!("No enabled channels to test.");
                return Ok(());
            }
            let mut failed = 0usize;
            for (name, ok) in &results {
                if *ok {
                    println!("✅ {name}: test notification sent");
                } else {
                    failed += 1;
                    println!("❌ {name}: test failed (see log)");
                }
            }
            if failed > 0 {
                bail!("{failed} channel test(s) failed");
            }
            Ok(())
        }
        ChannelCommands::Toggle { name } => {
            let mut config = app.config;
            let enabled = config.toggle_channel(&name)?;
            println!(
                "Channel {name} {}",
                if enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
    }
}

fn print_channel_status(status: &taskping::channels::ChannelStatus) {
    println!(
        "  {} {:<6} enabled={} configured={} relay={}",
        if status.enabled && status.configured { "✅" } else { "  " },
        status.name,
        status.enabled,
        status.configured,
        status.supports_relay
    );
    for (key, value) in &status.details {
        println!("      {key}: {value}");
    }
    if let Some(error) = &status.error {
        println!("      ⚠️  {error}");
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn relay_keeps_hyphenated_command_words() {
        let cli = Cli::try_parse_from(["taskping", "relay", "ABCD1234", "ls", "-la"]).unwrap();
        match cli.command {
            Commands::Relay { token, command } => {
                assert_eq!(token, "ABCD1234");
                assert_eq!(command.join(" "), "ls -la");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn notify_parses_type_flag() {
        let cli = Cli::try_parse_from(["taskping", "notify", "--type", "waiting"]).unwrap();
        match cli.command {
            Commands::Notify { kind, .. } => assert_eq!(kind, NotificationType::Waiting),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn sessions_remove_takes_token() {
        let cli = Cli::try_parse_from(["taskping", "sessions", "remove", "abcd1234"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sessions {
                command: SessionCommands::Remove { .. }
            }
        ));
    }

    #[test]
    fn timestamps_render_locally() {
        assert_eq!(format_timestamp(0).len(), 19);
    }
}
