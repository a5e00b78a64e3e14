// Licensed under the Open Software License version 3.0
//! C4: the shutdown decision state machine. Owns the wait-then-countdown
//! sequence triggered by power loss, the cancellation latch, and handing off
//! to the hook executor and the host-shutdown collaborator.
use super::phase::{ShutdownPhase, ShutdownStatus};
use crate::events::{DomainEvent, EventBus, EventKind, ShutdownCountdownTick};
use crate::hooks::executor::run_hooks;
use crate::hooks::types::{HookRegistry, HookSpec};
use crate::hostshutdown::HostShutdown;
use crate::nut::protocol::UpsSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant};

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

pub struct ShutdownManagerConfig {
    pub wait_minutes: u64,
    pub final_wait_seconds: u64,
    pub battery_runtime_threshold_minutes: u64,
    pub dry_run: bool,
}

/// Coordinates the whole power-lost-to-host-off sequence. Cloned cheaply
/// (every field is shared state) so it can be handed to a spawned task
/// while the monitor keeps its own handle for `on_power_lost`/`on_power_restored`.
#[derive(Clone)]
pub struct ShutdownManager {
    phase: Arc<RwLock<ShutdownPhase>>,
    power_lost_at_unix_ms: Arc<RwLock<Option<u128>>>,
    /// Set once a cancel is requested and held until power is restored, so a
    /// still-ongoing outage doesn't immediately re-trigger the sequence.
    cancelled_until_restore: Arc<RwLock<bool>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    config: Arc<ShutdownManagerConfig>,
    events: Arc<EventBus>,
    latest_snapshot: Arc<RwLock<Option<UpsSnapshot>>>,
    hook_specs: Arc<Vec<HookSpec>>,
    hook_registry: Arc<HookRegistry>,
    host_shutdown: Arc<dyn HostShutdown>,
    wait_skip_reason: Arc<RwLock<Option<String>>>,
}

impl ShutdownManager {
    pub fn new(
        config: ShutdownManagerConfig,
        events: Arc<EventBus>,
        latest_snapshot: Arc<RwLock<Option<UpsSnapshot>>>,
        hook_specs: Vec<HookSpec>,
        hook_registry: Arc<HookRegistry>,
        host_shutdown: Arc<dyn HostShutdown>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            phase: Arc::new(RwLock::new(ShutdownPhase::Idle)),
            power_lost_at_unix_ms: Arc::new(RwLock::new(None)),
            cancelled_until_restore: Arc::new(RwLock::new(false)),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            config: Arc::new(config),
            events,
            latest_snapshot,
            hook_specs: Arc::new(hook_specs),
            hook_registry,
            host_shutdown,
            wait_skip_reason: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_status(&self) -> ShutdownStatus {
        let phase = *self.phase.read().await;
        let power_lost_time_unix_ms = *self.power_lost_at_unix_ms.read().await;
        let elapsed_seconds = power_lost_time_unix_ms
            .map(|lost_at| now_unix_ms().saturating_sub(lost_at) as u64 / 1000)
            .unwrap_or(0);
        let remaining_seconds = match phase {
            ShutdownPhase::Waiting => (self.config.wait_minutes * 60).saturating_sub(elapsed_seconds),
            ShutdownPhase::FinalCountdown => self.config.final_wait_seconds,
            _ => 0,
        };
        ShutdownStatus {
            phase,
            power_lost_time_unix_ms,
            elapsed_seconds,
            remaining_seconds,
            in_final_countdown: phase == ShutdownPhase::FinalCountdown,
            wait_skip_reason: self.wait_skip_reason.read().await.clone(),
        }
    }

    /// Starts the wait-then-shutdown sequence. A no-op if already running or
    /// latched cancelled for this outage.
    pub async fn on_power_lost(&self) {
        if *self.phase.read().await != ShutdownPhase::Idle {
            return;
        }
        if *self.cancelled_until_restore.read().await {
            tracing::debug!("Power lost again during a cancelled outage; not re-arming");
            return;
        }
        *self.wait_skip_reason.write().await = None;

        *self.power_lost_at_unix_ms.write().await = Some(now_unix_ms());
        let _ = self.cancel_tx.send(false);
        *self.phase.write().await = ShutdownPhase::Waiting;

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_sequence().await;
        });
    }

    /// Clears the cancelled latch and, if a sequence is mid-flight, cancels it
    /// and returns to `Idle`.
    pub async fn on_power_restored(&self) {
        *self.cancelled_until_restore.write().await = false;
        let phase = *self.phase.read().await;
        if phase != ShutdownPhase::Idle && phase != ShutdownPhase::Completed {
            self.cancel_and_reset().await;
        }
    }

    /// Operator-requested cancel. Only effective during `Waiting` or
    /// `FinalCountdown`; once hooks have started running it's too late.
    pub async fn request_cancel(&self) -> bool {
        let phase = *self.phase.read().await;
        if !phase.is_cancellable() {
            return false;
        }
        *self.cancelled_until_restore.write().await = true;
        self.cancel_and_reset().await;
        true
    }

    async fn cancel_and_reset(&self) {
        let _ = self.cancel_tx.send(true);
        *self.phase.write().await = ShutdownPhase::Idle;
        *self.power_lost_at_unix_ms.write().await = None;
        self.events.publish_domain_event(DomainEvent::new(
            EventKind::ShutdownCancelled,
            "shutdown sequence cancelled",
        ));
    }

    /// Skips straight to `ExecutingHooks`, bypassing the wait and countdown.
    /// Runs in the background so a concurrent `request_cancel()` can still
    /// interrupt an in-progress hook.
    pub async fn request_immediate_shutdown(&self) {
        let phase = *self.phase.read().await;
        if phase == ShutdownPhase::ExecutingHooks
            || phase == ShutdownPhase::ShuttingDownHost
            || phase == ShutdownPhase::Completed
        {
            return;
        }
        *self.power_lost_at_unix_ms.write().await.get_or_insert(now_unix_ms());
        let _ = self.cancel_tx.send(false);
        *self.phase.write().await = ShutdownPhase::FinalCountdown;

        let manager = self.clone();
        tokio::spawn(async move {
            manager.execute_hooks_and_shutdown().await;
        });
    }

    /// Same as `request_immediate_shutdown` but awaits completion; used in
    /// tests that don't need to race a cancel.
    pub async fn request_immediate_shutdown_and_wait(&self) {
        self.request_immediate_shutdown().await;
        while !matches!(
            self.get_status().await.phase,
            ShutdownPhase::Idle | ShutdownPhase::Completed
        ) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn battery_runtime_seconds(&self) -> Option<f64> {
        self.latest_snapshot
            .read()
            .await
            .as_ref()
            .and_then(|snapshot| snapshot.battery_runtime_seconds)
    }

    async fn run_sequence(&self) {
        if !self.wait_phase().await {
            return;
        }
        *self.phase.write().await = ShutdownPhase::FinalCountdown;
        if !self.final_countdown_phase().await {
            return;
        }
        self.execute_hooks_and_shutdown().await;
    }

    /// 5-second-tick wait, breaking early (into `FinalCountdown`) the moment
    /// remaining battery runtime drops to the configured threshold. Returns
    /// `false` if cancelled.
    async fn wait_phase(&self) -> bool {
        let wait_seconds = self.config.wait_minutes * 60;
        let threshold_seconds = (self.config.battery_runtime_threshold_minutes * 60) as f64;
        let mut ticker = interval(Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_secs(wait_seconds);

        loop {
            if *self.cancel_rx.borrow() {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            if let Some(runtime) = self.battery_runtime_seconds().await {
                if runtime <= threshold_seconds {
                    tracing::info!(
                        "Battery runtime {}s at or below threshold {}s, skipping ahead to final countdown",
                        runtime,
                        threshold_seconds
                    );
                    *self.wait_skip_reason.write().await = Some(String::from("low_runtime"));
                    return true;
                }
            }

            let mut cancel_rx = self.cancel_rx.clone();
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// 1-second-tick countdown broadcasting `shutdown_countdown`. Returns
    /// `false` if cancelled before the countdown reaches zero.
    async fn final_countdown_phase(&self) -> bool {
        let total = self.config.final_wait_seconds;
        let mut remaining = total;
        let mut ticker = interval(Duration::from_secs(1));

        loop {
            if *self.cancel_rx.borrow() {
                return false;
            }
            self.events.publish_shutdown_countdown(ShutdownCountdownTick {
                phase: ShutdownPhase::FinalCountdown,
                remaining_seconds: remaining,
            });
            if remaining == 0 {
                return true;
            }

            let mut cancel_rx = self.cancel_rx.clone();
            tokio::select! {
                _ = ticker.tick() => { remaining = remaining.saturating_sub(1); }
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    async fn execute_hooks_and_shutdown(&self) {
        *self.phase.write().await = ShutdownPhase::ExecutingHooks;

        let outcomes = run_hooks(
            &self.hook_specs,
            &self.hook_registry,
            &self.events,
            self.cancel_rx.clone(),
            self.config.dry_run,
        )
        .await;

        if *self.cancel_rx.borrow() {
            *self.phase.write().await = ShutdownPhase::Idle;
            return;
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes
            .iter()
            .filter(|o| !o.success && !o.skipped && !o.cancelled)
            .count();
        let skipped = outcomes.iter().filter(|o| o.skipped || o.cancelled).count();
        if failed > 0 {
            tracing::warn!("{} pre-shutdown hook(s) did not succeed", failed);
        }
        let counts = HashMap::from([
            (String::from("hooks_succeeded"), succeeded.to_string()),
            (String::from("hooks_failed"), failed.to_string()),
            (String::from("hooks_skipped"), skipped.to_string()),
        ]);

        *self.phase.write().await = ShutdownPhase::ShuttingDownHost;
        match self.host_shutdown.shutdown().await {
            Ok(()) => {
                *self.phase.write().await = ShutdownPhase::Completed;
                self.events.publish_domain_event(
                    DomainEvent::new(EventKind::Shutdown, "pre-shutdown hooks complete, host shutdown issued")
                        .with_metadata(counts),
                );
            }
            Err(error) => {
                tracing::error!("Host shutdown failed: {}", error);
                *self.phase.write().await = ShutdownPhase::Idle;
                self.events.publish_domain_event(
                    DomainEvent::new(EventKind::ShutdownFailed, format!("host shutdown failed: {error}"))
                        .with_metadata(counts),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::MockHook;
    use crate::hostshutdown::MockHostShutdown;

    fn test_manager(wait_minutes: u64, final_wait_seconds: u64) -> ShutdownManager {
        let mut registry = HookRegistry::new();
        registry.register("mock", |_| Ok(Box::new(MockHook) as Box<dyn crate::hooks::types::Hook>));
        ShutdownManager::new(
            ShutdownManagerConfig {
                wait_minutes,
                final_wait_seconds,
                battery_runtime_threshold_minutes: 2,
                dry_run: true,
            },
            Arc::new(EventBus::new()),
            Arc::new(RwLock::new(None)),
            vec![HookSpec::new("a", 0, "mock")],
            Arc::new(registry),
            Arc::new(MockHostShutdown::new()),
        )
    }

    #[tokio::test]
    async fn immediate_shutdown_reaches_completed() {
        let manager = test_manager(60, 0);
        manager.request_immediate_shutdown_and_wait().await;
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Completed);
    }

    #[tokio::test]
    async fn cancel_during_hooks_stops_before_host_shutdown() {
        let mut registry = HookRegistry::new();
        registry.register("slow", |_| {
            Ok(Box::new(crate::hooks::types::SlowHook { sleep_seconds: 5 }) as Box<dyn crate::hooks::types::Hook>)
        });
        let host_shutdown = Arc::new(MockHostShutdown::new());
        let manager = ShutdownManager::new(
            ShutdownManagerConfig {
                wait_minutes: 60,
                final_wait_seconds: 0,
                battery_runtime_threshold_minutes: 2,
                dry_run: true,
            },
            Arc::new(EventBus::new()),
            Arc::new(RwLock::new(None)),
            vec![HookSpec::new("slow-hook", 0, "slow")],
            Arc::new(registry),
            host_shutdown.clone(),
        );

        manager.request_immediate_shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::ExecutingHooks);

        assert!(manager.request_cancel().await);
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Idle);
        // The background task still running the hook must not reach the host
        // shutdown call once cancelled.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(host_shutdown.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_before_hooks_returns_to_idle() {
        let manager = test_manager(60, 60);
        manager.on_power_lost().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Waiting);
        assert!(manager.request_cancel().await);
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Idle);
    }

    #[tokio::test]
    async fn power_restored_resets_latch() {
        let manager = test_manager(60, 60);
        manager.on_power_lost().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.request_cancel().await);
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Idle);

        // Still within the same outage: latched cancelled, so power-lost is a no-op.
        manager.on_power_lost().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Idle);

        manager.on_power_restored().await;
        manager.on_power_lost().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.get_status().await.phase, ShutdownPhase::Waiting);
    }
}
