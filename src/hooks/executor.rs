// Licensed under the Open Software License version 3.0
//! C5: runs a set of `HookSpec`s to completion ahead of host shutdown.
//!
//! Hooks are grouped by `priority` (ascending, lowest first) and each group
//! runs to completion before the next starts; within a group every hook runs
//! concurrently. Disabled hooks are resolved to `skipped` outcomes up front
//! and never touch the registry.
use super::types::{HookOutcome, HookRegistry, HookSpec, OnFailure};
use crate::events::{EventBus, HookProgressEvent};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;

fn skipped_outcome(spec: &HookSpec) -> HookOutcome {
    HookOutcome {
        hook_id: spec.id.clone(),
        hook_name: spec.display_name.clone(),
        priority: spec.priority,
        success: false,
        error: None,
        duration_seconds: 0.0,
        attempts: 0,
        cancelled: false,
        skipped: true,
    }
}

fn cancelled_outcome(spec: &HookSpec) -> HookOutcome {
    HookOutcome {
        hook_id: spec.id.clone(),
        hook_name: spec.display_name.clone(),
        priority: spec.priority,
        success: false,
        error: None,
        duration_seconds: 0.0,
        attempts: 0,
        cancelled: true,
        skipped: false,
    }
}

/// Runs one hook to its final outcome: up to `1 + maxRetries` attempts, a
/// fixed delay between retries, cancellation re-checked before every retry,
/// and a per-attempt timeout. `dry_run` probes `test_connection()` instead of
/// mutating any managed device.
async fn run_one_hook(
    spec: &HookSpec,
    registry: &HookRegistry,
    cancel: &watch::Receiver<bool>,
    dry_run: bool,
) -> HookOutcome {
    let start = Instant::now();

    let hook = match registry.create_instance(&spec.plugin_id, &spec.config) {
        Ok(hook) => hook,
        Err(error) => {
            // Configuration errors are terminal; no point retrying them.
            return HookOutcome {
                hook_id: spec.id.clone(),
                hook_name: spec.display_name.clone(),
                priority: spec.priority,
                success: false,
                error: Some(error.to_string()),
                duration_seconds: start.elapsed().as_secs_f64(),
                attempts: 0,
                cancelled: false,
                skipped: false,
            };
        }
    };

    let max_attempts = 1 + spec.max_retries;
    let mut last_error: Option<String> = None;

    for attempt in 1..=max_attempts {
        if *cancel.borrow() {
            return cancelled_outcome(spec);
        }

        let call = if dry_run {
            hook.test_connection()
        } else {
            hook.execute()
        };

        let outcome = timeout(Duration::from_secs(spec.timeout_seconds), call).await;
        match outcome {
            Ok(Ok(true)) => {
                return HookOutcome {
                    hook_id: spec.id.clone(),
                    hook_name: spec.display_name.clone(),
                    priority: spec.priority,
                    success: true,
                    error: None,
                    duration_seconds: start.elapsed().as_secs_f64(),
                    attempts: attempt,
                    cancelled: false,
                    skipped: false,
                };
            }
            Ok(Ok(false)) => last_error = Some(String::from("hook reported failure")),
            Ok(Err(error)) => last_error = Some(error.to_string()),
            Err(_) => last_error = Some(format!("timed out after {}s", spec.timeout_seconds)),
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(spec.retry_delay_seconds)) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return cancelled_outcome(spec);
                    }
                }
            }
        }
    }

    HookOutcome {
        hook_id: spec.id.clone(),
        hook_name: spec.display_name.clone(),
        priority: spec.priority,
        success: false,
        error: last_error,
        duration_seconds: start.elapsed().as_secs_f64(),
        attempts: max_attempts,
        cancelled: false,
        skipped: false,
    }
}

/// Runs every enabled hook, grouped and ordered by priority, publishing a
/// `HookProgressEvent` after each outcome. Returns all outcomes in the order
/// they completed scheduling (group order, skipped-and-cancelled included).
///
/// If a hook with `onFailure == Abort` fails, every hook in subsequent groups
/// is resolved to a `cancelled` outcome without being instantiated.
pub async fn run_hooks(
    specs: &[HookSpec],
    registry: &HookRegistry,
    events: &EventBus,
    cancel: watch::Receiver<bool>,
    dry_run: bool,
) -> Vec<HookOutcome> {
    let total = specs.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let mut outcomes = Vec::with_capacity(total);

    let mut groups: BTreeMap<i32, Vec<&HookSpec>> = BTreeMap::new();
    for spec in specs {
        if !spec.enabled {
            let outcome = skipped_outcome(spec);
            completed.fetch_add(1, Ordering::SeqCst);
            events.publish_hook_progress(HookProgressEvent::from((
                &outcome,
                total,
                completed.load(Ordering::SeqCst),
            )));
            outcomes.push(outcome);
            continue;
        }
        groups.entry(spec.priority).or_default().push(spec);
    }

    let mut aborted = false;

    for (_priority, group) in groups {
        if aborted || *cancel.borrow() {
            for spec in group {
                let outcome = cancelled_outcome(spec);
                completed.fetch_add(1, Ordering::SeqCst);
                events.publish_hook_progress(HookProgressEvent::from((
                    &outcome,
                    total,
                    completed.load(Ordering::SeqCst),
                )));
                outcomes.push(outcome);
            }
            continue;
        }

        let group_results = futures_join_all(group.iter().map(|spec| {
            let cancel = cancel.clone();
            async move { run_one_hook(spec, registry, &cancel, dry_run).await }
        }))
        .await;

        for (spec, outcome) in group.into_iter().zip(group_results.into_iter()) {
            completed.fetch_add(1, Ordering::SeqCst);
            events.publish_hook_progress(HookProgressEvent::from((
                &outcome,
                total,
                completed.load(Ordering::SeqCst),
            )));
            if !outcome.success && !outcome.cancelled && !outcome.skipped && spec.on_failure == OnFailure::Abort {
                aborted = true;
            }
            outcomes.push(outcome);
        }
    }

    outcomes
}

/// Minimal stand-in for `futures::future::join_all` so the crate doesn't pull
/// in the `futures` umbrella crate for one combinator; awaits every future to
/// completion and preserves input order.
async fn futures_join_all<I, F, T>(futures: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: std::future::Future<Output = T>,
{
    let handles: Vec<_> = futures.into_iter().collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::{FailingHook, Hook, MockHook, SlowHook};
    use std::collections::HashMap;

    fn registry_with(plugin_id: &str, factory: impl Fn() -> Box<dyn Hook> + Send + Sync + 'static) -> HookRegistry {
        let mut registry = HookRegistry::new();
        let plugin_id = plugin_id.to_string();
        registry.register(plugin_id, move |_config| Ok(factory()));
        registry
    }

    #[tokio::test]
    async fn all_enabled_hooks_succeed() {
        let registry = registry_with("mock", || Box::new(MockHook));
        let events = EventBus::new();
        let specs = vec![HookSpec::new("a", 0, "mock"), HookSpec::new("b", 1, "mock")];
        let (_tx, rx) = watch::channel(false);
        let outcomes = run_hooks(&specs, &registry, &events, rx, false).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn disabled_hooks_are_skipped_without_instantiation() {
        let registry = registry_with("mock", || Box::new(MockHook));
        let events = EventBus::new();
        let mut spec = HookSpec::new("a", 0, "mock");
        spec.enabled = false;
        let (_tx, rx) = watch::channel(false);
        let outcomes = run_hooks(&[spec], &registry, &events, rx, false).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].skipped);
    }

    #[tokio::test]
    async fn abort_on_failure_cancels_later_groups() {
        let registry = registry_with("fail", || Box::new(FailingHook));
        let events = EventBus::new();
        let mut failing = HookSpec::new("a", 0, "fail");
        failing.on_failure = OnFailure::Abort;
        let later = HookSpec::new("b", 1, "fail");
        let (_tx, rx) = watch::channel(false);
        let outcomes = run_hooks(&[failing, later], &registry, &events, rx, false).await;
        assert!(!outcomes[0].success);
        assert!(outcomes[1].cancelled);
    }

    #[tokio::test]
    async fn cancellation_flag_stops_a_running_hook() {
        let registry = registry_with("slow", || Box::new(SlowHook { sleep_seconds: 5 }));
        let events = EventBus::new();
        let spec = HookSpec::new("a", 0, "slow");
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let outcomes = run_hooks(&[spec], &registry, &events, rx, false).await;
        assert!(outcomes[0].cancelled);
    }

    #[tokio::test]
    async fn retries_exhaust_before_giving_up() {
        let registry = registry_with("fail", || Box::new(FailingHook));
        let events = EventBus::new();
        let mut spec = HookSpec::new("a", 0, "fail");
        spec.max_retries = 2;
        spec.retry_delay_seconds = 0;
        let (_tx, rx) = watch::channel(false);
        let outcomes = run_hooks(&[spec], &registry, &events, rx, false).await;
        assert_eq!(outcomes[0].attempts, 3);
        assert!(!outcomes[0].success);
    }
}
