// Licensed under the Open Software License version 3.0
use crate::hooks::types::HookOutcome;
use crate::nut::protocol::UpsSnapshot;
use crate::shutdown::phase::ShutdownPhase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Broadcast channel capacity for each event-bus topic.
const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PowerLost,
    PowerRestored,
    LowBattery,
    NutDisconnected,
    NutReconnected,
    ShutdownCancelled,
    Shutdown,
    ShutdownFailed,
    Startup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A single domain-level occurrence, the payload of the `domain_event` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub previous: Option<crate::nut::protocol::UpsStatus>,
    pub current: crate::nut::protocol::UpsStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownCountdownTick {
    pub phase: ShutdownPhase,
    pub remaining_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookProgressEvent {
    pub hook_id: String,
    pub hook_name: String,
    pub status: String,
    pub priority: i32,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
    pub progress_total: usize,
    pub progress_completed: usize,
}

impl From<(&HookOutcome, usize, usize)> for HookProgressEvent {
    fn from((outcome, total, completed): (&HookOutcome, usize, usize)) -> Self {
        Self {
            hook_id: outcome.hook_id.clone(),
            hook_name: outcome.hook_name.clone(),
            status: outcome.status_label().to_string(),
            priority: outcome.priority,
            duration_seconds: Some(outcome.duration_seconds),
            error: outcome.error.clone(),
            progress_total: total,
            progress_completed: completed,
        }
    }
}

/// Typed publish/subscribe surface for the topics named in the component design:
/// `snapshot_updated`, `status_changed`, `shutdown_countdown`, `hook_progress`, `domain_event`.
///
/// Subscribers register at startup by cloning the relevant `Sender` into a
/// `subscribe()` receiver; delivery happens synchronously from whichever
/// component publishes, matching the monitor's cooperative context.
pub struct EventBus {
    pub snapshot_updated: broadcast::Sender<UpsSnapshot>,
    pub status_changed: broadcast::Sender<StatusChanged>,
    pub shutdown_countdown: broadcast::Sender<ShutdownCountdownTick>,
    pub hook_progress: broadcast::Sender<HookProgressEvent>,
    pub domain_event: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (snapshot_updated, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (status_changed, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (shutdown_countdown, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (hook_progress, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (domain_event, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            snapshot_updated,
            status_changed,
            shutdown_countdown,
            hook_progress,
            domain_event,
        }
    }

    pub fn publish_domain_event(&self, event: DomainEvent) {
        if self.domain_event.receiver_count() > 0 {
            let _ = self.domain_event.send(event);
        }
    }

    pub fn publish_hook_progress(&self, event: HookProgressEvent) {
        if self.hook_progress.receiver_count() > 0 {
            let _ = self.hook_progress.send(event);
        }
    }

    pub fn publish_snapshot(&self, snapshot: UpsSnapshot) {
        if self.snapshot_updated.receiver_count() > 0 {
            let _ = self.snapshot_updated.send(snapshot);
        }
    }

    pub fn publish_status_changed(&self, event: StatusChanged) {
        if self.status_changed.receiver_count() > 0 {
            let _ = self.status_changed.send(event);
        }
    }

    pub fn publish_shutdown_countdown(&self, tick: ShutdownCountdownTick) {
        if self.shutdown_countdown.receiver_count() > 0 {
            let _ = self.shutdown_countdown.send(tick);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
