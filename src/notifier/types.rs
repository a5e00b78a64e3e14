// Licensed under the Open Software License version 3.0
use crate::error::CoreError;
use crate::events::{EventKind, NotificationLevel};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;
type TestFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;

const ALL_EVENT_KINDS: [EventKind; 9] = [
    EventKind::PowerLost,
    EventKind::PowerRestored,
    EventKind::LowBattery,
    EventKind::NutDisconnected,
    EventKind::NutReconnected,
    EventKind::ShutdownCancelled,
    EventKind::Shutdown,
    EventKind::ShutdownFailed,
    EventKind::Startup,
];

/// A configured outbound channel: which plugin handles it, and which event
/// kinds it's subscribed to -- an explicit whitelist, not a severity cutoff,
/// so a channel can take `PowerLost` without also taking `NutDisconnected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierChannelSpec {
    pub id: String,
    pub plugin_id: String,
    pub enabled: bool,
    pub enabled_events: HashSet<EventKind>,
    pub config: HashMap<String, String>,
}

impl NotifierChannelSpec {
    /// Subscribed to every event kind by default.
    pub fn new(id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugin_id: plugin_id.into(),
            enabled: true,
            enabled_events: ALL_EVENT_KINDS.iter().copied().collect(),
            config: HashMap::new(),
        }
    }

    pub fn subscribes_to(&self, kind: EventKind) -> bool {
        self.enabled_events.contains(&kind)
    }
}

/// The capability set every outbound notification channel must expose
/// (§6). Boxed futures keep `Box<dyn Notifier>` object-safe without pulling
/// in an async-trait macro crate.
pub trait Notifier: Send + Sync {
    fn send(
        &self,
        title: &str,
        body: &str,
        level: NotificationLevel,
        metadata: &HashMap<String, String>,
    ) -> SendFuture<'_>;

    fn test(&self) -> TestFuture<'_>;

    fn validate_config(&self, config: &HashMap<String, String>) -> Result<(), CoreError>;
}

/// `pluginId -> factory(config)`, mirroring the hook registry's explicit
/// registration table (§9).
pub struct NotifierRegistry {
    factories: HashMap<
        String,
        Box<dyn Fn(&HashMap<String, String>) -> Result<Box<dyn Notifier>, CoreError> + Send + Sync>,
    >,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn(&HashMap<String, String>) -> Result<Box<dyn Notifier>, CoreError> + Send + Sync + 'static,
    {
        self.factories.insert(plugin_id.into(), Box::new(factory));
    }

    pub fn create_instance(
        &self,
        plugin_id: &str,
        config: &HashMap<String, String>,
    ) -> Result<Box<dyn Notifier>, CoreError> {
        let factory = self
            .factories
            .get(plugin_id)
            .ok_or_else(|| CoreError::ConfigInvalid(format!("notifier not found: {plugin_id}")))?;
        factory(config)
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Records every call instead of delivering anything; used in tests and for
/// channels configured with an unknown plugin while `testMode == mock`.
pub struct MockNotifier {
    pub fail_times: std::sync::atomic::AtomicU32,
}

impl MockNotifier {
    pub fn new(fail_times: u32) -> Self {
        Self {
            fail_times: std::sync::atomic::AtomicU32::new(fail_times),
        }
    }
}

impl Notifier for MockNotifier {
    fn send(
        &self,
        _title: &str,
        _body: &str,
        _level: NotificationLevel,
        _metadata: &HashMap<String, String>,
    ) -> SendFuture<'_> {
        Box::pin(async move {
            use std::sync::atomic::Ordering;
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(CoreError::TransientIo(String::from("simulated send failure")));
            }
            Ok(())
        })
    }

    fn test(&self) -> TestFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn validate_config(&self, _config: &HashMap<String, String>) -> Result<(), CoreError> {
        Ok(())
    }
}
