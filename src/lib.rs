#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod channels;
pub mod config;
pub mod notifier;
pub mod relay;
pub mod session;
pub mod util;

pub use config::Config;

/// Session registry subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionCommands {
    /// List every stored relay session with its effective state
    List,
    /// Delete all expired sessions
    Sweep,
    /// Delete one session by token
    Remove {
        /// Relay token (case-insensitive)
        token: String,
    },
}

/// Channel management subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelCommands {
    /// List known channels and whether they are enabled
    List,
    /// Show configuration status for every channel
    Status,
    /// Send a test notification through every enabled channel
    Test,
    /// Enable or disable a channel
    Toggle {
        /// Channel name (slack, email)
        name: String,
    },
}
