pub mod schema;

pub use schema::{ChannelsConfig, Config, EmailConfig, RelayConfig, SlackConfig};
