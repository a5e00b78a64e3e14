// Licensed under the Open Software License version 3.0
//! C6: fans a domain event out to every configured channel subscribed to its
//! kind, retrying each delivery independently and remembering per-channel
//! errors across dispatches until a send finally succeeds.
use super::types::{NotifierChannelSpec, NotifierRegistry};
use crate::events::{DomainEvent, EventKind, NotificationLevel};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const MAX_SEND_ATTEMPTS: u32 = 3;

/// `EventKind -> NotificationLevel`, the fixed severity table every event is
/// classified against before channel filtering.
fn level_for(kind: EventKind) -> NotificationLevel {
    match kind {
        EventKind::PowerLost => NotificationLevel::Warning,
        EventKind::PowerRestored => NotificationLevel::Info,
        EventKind::LowBattery => NotificationLevel::Error,
        EventKind::NutDisconnected => NotificationLevel::Warning,
        EventKind::NutReconnected => NotificationLevel::Info,
        EventKind::ShutdownCancelled => NotificationLevel::Info,
        EventKind::Shutdown => NotificationLevel::Error,
        EventKind::ShutdownFailed => NotificationLevel::Error,
        EventKind::Startup => NotificationLevel::Info,
    }
}

fn diagnostic_block(event: &DomainEvent) -> String {
    if event.metadata.is_empty() {
        return String::new();
    }
    let mut lines: Vec<String> = event
        .metadata
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();
    lines.sort();
    format!("\n\n---\n{}", lines.join("\n"))
}

pub struct NotifierDispatcher {
    registry: Arc<NotifierRegistry>,
    channels: RwLock<Vec<NotifierChannelSpec>>,
    /// channel id -> last error message, cleared as soon as a send succeeds.
    channel_errors: RwLock<HashMap<String, String>>,
}

impl NotifierDispatcher {
    pub fn new(registry: Arc<NotifierRegistry>, channels: Vec<NotifierChannelSpec>) -> Self {
        Self {
            registry,
            channels: RwLock::new(channels),
            channel_errors: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the channel list. Errors recorded against a channel id that
    /// still exists in the new list survive the swap; errors for removed
    /// channels are dropped.
    pub async fn reconfigure(&self, new_channels: Vec<NotifierChannelSpec>) {
        let surviving_ids: std::collections::HashSet<&str> =
            new_channels.iter().map(|c| c.id.as_str()).collect();
        self.channel_errors
            .write()
            .await
            .retain(|id, _| surviving_ids.contains(id.as_str()));
        *self.channels.write().await = new_channels;
    }

    pub async fn channel_errors(&self) -> HashMap<String, String> {
        self.channel_errors.read().await.clone()
    }

    /// Sends `event` to every enabled channel whose subscribed event set
    /// contains `event.kind`, each with its own retry budget.
    pub async fn dispatch(&self, event: &DomainEvent) {
        let level = level_for(event.kind);
        let channels = self.channels.read().await.clone();
        // Diagnostic metadata is only appended for warning/error events.
        let body = if level >= NotificationLevel::Warning {
            format!("{}{}", event.message, diagnostic_block(event))
        } else {
            event.message.clone()
        };

        for channel in channels {
            if !channel.enabled || !channel.subscribes_to(event.kind) {
                continue;
            }
            self.send_with_retry(&channel, &event.message, &body, level, &event.metadata)
                .await;
        }
    }

    async fn send_with_retry(
        &self,
        channel: &NotifierChannelSpec,
        title: &str,
        body: &str,
        level: NotificationLevel,
        metadata: &HashMap<String, String>,
    ) {
        let notifier = match self.registry.create_instance(&channel.plugin_id, &channel.config) {
            Ok(notifier) => notifier,
            Err(error) => {
                self.channel_errors
                    .write()
                    .await
                    .insert(channel.id.clone(), error.to_string());
                return;
            }
        };

        let mut last_error = None;
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            match notifier.send(title, body, level, metadata).await {
                Ok(()) => {
                    self.channel_errors.write().await.remove(&channel.id);
                    return;
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_SEND_ATTEMPTS {
                        let delay = Duration::from_secs_f64((attempt as f64).min(5.0));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        if let Some(error) = last_error {
            tracing::warn!("Notifier channel {} failed after retries: {}", channel.id, error);
            self.channel_errors.write().await.insert(channel.id.clone(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{MockNotifier, Notifier};
    use crate::events::DomainEvent;

    fn registry_with(fail_times: u32) -> Arc<NotifierRegistry> {
        let mut registry = NotifierRegistry::new();
        registry.register("mock", move |_| Ok(Box::new(MockNotifier::new(fail_times)) as Box<dyn Notifier>));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn successful_send_clears_prior_error() {
        let registry = registry_with(0);
        let channel = NotifierChannelSpec::new("c1", "mock");
        let dispatcher = NotifierDispatcher::new(registry, vec![channel]);
        dispatcher
            .channel_errors
            .write()
            .await
            .insert("c1".to_string(), "stale error".to_string());
        dispatcher.dispatch(&DomainEvent::new(EventKind::PowerLost, "power lost")).await;
        assert!(dispatcher.channel_errors().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribed_event_is_skipped() {
        let registry = registry_with(0);
        let mut channel = NotifierChannelSpec::new("c1", "mock");
        channel.enabled_events.remove(&EventKind::PowerRestored);
        let dispatcher = NotifierDispatcher::new(registry, vec![channel]);
        dispatcher.dispatch(&DomainEvent::new(EventKind::PowerRestored, "power restored")).await;
        assert!(dispatcher.channel_errors().await.is_empty());
    }

    #[tokio::test]
    async fn retries_succeed_within_budget() {
        let registry = registry_with(2);
        let channel = NotifierChannelSpec::new("c1", "mock");
        let dispatcher = NotifierDispatcher::new(registry, vec![channel]);
        dispatcher.dispatch(&DomainEvent::new(EventKind::LowBattery, "low battery")).await;
        assert!(dispatcher.channel_errors().await.is_empty());
    }

    #[tokio::test]
    async fn reconfigure_drops_errors_for_removed_channels() {
        let registry = registry_with(0);
        let channel = NotifierChannelSpec::new("c1", "mock");
        let dispatcher = NotifierDispatcher::new(registry, vec![channel]);
        dispatcher
            .channel_errors
            .write()
            .await
            .insert("c1".to_string(), "error".to_string());
        dispatcher.reconfigure(vec![]).await;
        assert!(dispatcher.channel_errors().await.is_empty());
    }
}
