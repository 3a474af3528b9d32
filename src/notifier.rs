//! Fan-out of one notification to every enabled channel.

use crate::channels::{build_channels, ChannelStatus, Notification, NotificationChannel};
use crate::config::Config;
use crate::relay::FailureNotifier;
use crate::session::SessionStore;

use std::sync::Arc;

/// What happened to a notification on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDelivery {
    pub channel: String,
    pub outcome: DeliveryOutcome,
}

/// Per-channel results of one [`Notifier::notify`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub deliveries: Vec<ChannelDelivery>,
}

impl NotifyReport {
    pub fn delivered(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.outcome == DeliveryOutcome::Delivered)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| matches!(d.outcome, DeliveryOutcome::Failed(_)))
            .count()
    }
}

pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn from_config(config: &Config, store: Arc<dyn SessionStore>) -> Self {
        Self::new(build_channels(config, store))
    }

    pub fn channels(&self) -> &[Arc<dyn NotificationChannel>] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.iter().find(|c| c.name() == name)
    }

    /// Failure reporter that alerts through this notifier's channels.
    pub fn failure_notifier(&self) -> FailureNotifier {
        FailureNotifier::new(self.channels.clone())
    }

    /// Send to every channel. A failing channel never stops the others.
    pub async fn notify(&self, notification: &Notification) -> NotifyReport {
        let mut report = NotifyReport::default();
        for channel in &self.channels {
            let outcome = match channel.send(notification).await {
                Ok(true) => DeliveryOutcome::Delivered,
                Ok(false) => DeliveryOutcome::Skipped,
                Err(e) => {
                    tracing::warn!(
                        channel = channel.name(),
                        error = %e,
                        "notification not delivered"
                    );
                    DeliveryOutcome::Failed(e.to_string())
                }
            };
            report.deliveries.push(ChannelDelivery {
                channel: channel.name().to_string(),
                outcome,
            });
        }

        if report.delivered() == 0 {
            tracing::warn!(kind = notification.kind.as_str(), "notification reached no channel");
        } else {
            tracing::info!(
                kind = notification.kind.as_str(),
                project = %notification.project,
                channels = report.delivered(),
                "notification sent"
            );
        }
        report
    }

    /// Run every enabled channel's self-test.
    pub async fn test_all(&self) -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            results.push((channel.name().to_string(), channel.test().await));
        }
        results
    }

    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.channels.iter().map(|c| c.status()).collect()
    }
}
