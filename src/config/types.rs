// Licensed under the Open Software License version 3.0
use crate::hooks::types::HookSpec;
use crate::notifier::types::NotifierChannelSpec;
use crate::nut::config::NutMonitoringConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Values to generate example config file
pub trait Example {
    fn example() -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TestMode {
    #[default]
    Live,
    /// Hooks and the host-shutdown collaborator run, but against a mock
    /// implementation instead of real devices/the real host.
    DryRun,
    /// Every collaborator is replaced by its in-memory mock, regardless of
    /// what's configured; used for demoing and integration tests.
    Mock,
}

/// Wake-on-LAN is config-only: the crate records the settings so they survive
/// round-tripping through the config file, but does not act on them (§9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WakeOnLanConfig {
    pub enabled: bool,
    pub mac_address: Option<String>,
    pub broadcast_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ShutdownSettings {
    pub wait_minutes: Option<u64>,
    /// Informational only; never used to trigger a shutdown (§9 decision).
    pub shutdown_battery_percent: Option<f64>,
    pub final_wait_seconds: Option<u64>,
    pub estimated_runtime_threshold_minutes: Option<u64>,
}

impl Example for ShutdownSettings {
    fn example() -> Self {
        Self {
            wait_minutes: Some(2),
            shutdown_battery_percent: Some(20.0),
            final_wait_seconds: Some(30),
            estimated_runtime_threshold_minutes: Some(5),
        }
    }
}

impl ShutdownSettings {
    pub fn wait_minutes(&self) -> u64 {
        self.wait_minutes.unwrap_or(2)
    }

    pub fn final_wait_seconds(&self) -> u64 {
        self.final_wait_seconds.unwrap_or(30)
    }

    pub fn estimated_runtime_threshold_minutes(&self) -> u64 {
        self.estimated_runtime_threshold_minutes.unwrap_or(5)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
/// `Config` struct for deserializing config.json
pub struct Config {
    pub nut: NutMonitoringConfig,
    pub shutdown: ShutdownSettings,
    pub pre_shutdown_hooks: Vec<HookSpec>,
    pub notifier_channels: Vec<NotifierChannelSpec>,
    pub test_mode: TestMode,
    pub wake_on_lan: WakeOnLanConfig,
}

impl Example for Config {
    fn example() -> Self {
        Self {
            nut: NutMonitoringConfig::example(),
            shutdown: ShutdownSettings::example(),
            pre_shutdown_hooks: vec![HookSpec::new("managed-nas", 0, "ssh-command")],
            notifier_channels: vec![NotifierChannelSpec::new("primary-email", "smtp")],
            test_mode: TestMode::Live,
            wake_on_lan: WakeOnLanConfig::default(),
        }
    }
}

impl Config {
    pub fn sample_interval(&self) -> Duration {
        self.nut.sample_interval()
    }
}
