// Licensed under the Open Software License version 3.0
use serde::{Deserialize, Serialize};

/// Forward-progressing states of the shutdown state machine (C4).
///
/// Transitions only move forward except for the two cancellation paths that
/// return to `Idle`: a cancel request during `Waiting`, and power being
/// restored before `FinalCountdown` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    Idle,
    Waiting,
    FinalCountdown,
    ExecutingHooks,
    ShuttingDownHost,
    Completed,
}

impl ShutdownPhase {
    /// `ShuttingDownHost` and `Completed` are the point of no return: hooks
    /// may already have altered managed devices, and the host shutdown
    /// command itself is not something to interrupt mid-flight.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            ShutdownPhase::Waiting | ShutdownPhase::FinalCountdown | ShutdownPhase::ExecutingHooks
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownStatus {
    pub phase: ShutdownPhase,
    pub power_lost_time_unix_ms: Option<u128>,
    pub elapsed_seconds: u64,
    pub remaining_seconds: u64,
    pub in_final_countdown: bool,
    /// Why the wait phase was short-circuited, e.g. `"low_runtime"`. Cleared
    /// on the next `on_power_lost`.
    pub wait_skip_reason: Option<String>,
}

impl Default for ShutdownStatus {
    fn default() -> Self {
        Self {
            phase: ShutdownPhase::Idle,
            power_lost_time_unix_ms: None,
            elapsed_seconds: 0,
            remaining_seconds: 0,
            in_final_countdown: false,
            wait_skip_reason: None,
        }
    }
}
