pub mod email;
pub mod notification;
pub mod registrar;
pub mod slack;
pub mod traits;

pub use email::EmailChannel;
pub use notification::{Notification, NotificationMetadata, NotificationType};
pub use registrar::SessionRegistrar;
pub use slack::SlackChannel;
pub use traits::{relay_reply, ChannelStatus, NotificationChannel};

use crate::config::Config;
use crate::session::SessionStore;
use std::sync::Arc;

/// Every channel taskping knows about, enabled or not, in display order.
pub fn build_channels(
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> Vec<Arc<dyn NotificationChannel>> {
    let registrar = SessionRegistrar::new(store, &config.relay);
    vec![
        Arc::new(SlackChannel::new(
            config.channels.slack.clone(),
            registrar.clone(),
        )),
        Arc::new(EmailChannel::new(config.channels.email.clone(), registrar)),
    ]
}
