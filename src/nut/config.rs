// Licensed under the Open Software License version 3.0
use crate::config::types::Example;
use rups::{Auth, Config, ConfigBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection parameters for one NUT server. `ups_name` is `None` when the
/// UPS should be auto-discovered via `LIST UPS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutServerConfig {
    host: String,
    port: Option<u16>,
    enable_tls: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    ups_name: Option<String>,
}

impl Example for NutServerConfig {
    fn example() -> Self {
        Self {
            host: String::from("localhost"),
            port: Some(rups::DEFAULT_PORT),
            enable_tls: Some(false),
            username: Some(String::from("ups-monitor")),
            password: Some(String::from("EXAMPLE_PASSWORD")),
            ups_name: None,
        }
    }
}

impl NutServerConfig {
    pub fn get_server_id(&self) -> String {
        format!(
            "{}@{}:{}",
            self.username.clone().unwrap_or_default(),
            self.host,
            self.port.unwrap_or(rups::DEFAULT_PORT),
        )
    }

    pub fn ups_name(&self) -> Option<&str> {
        self.ups_name.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(rups::DEFAULT_PORT)
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn build_rups_config(&self) -> Config {
        // Read-only commands don't need auth.
        let auth: Option<Auth> = match (self.username.clone(), self.password.clone()) {
            (Some(username), Some(password)) => Some(Auth::new(username, Some(password))),
            _ => None,
        };

        ConfigBuilder::new()
            .with_timeout(Duration::from_secs(10))
            .with_host(
                (self.host.clone(), self.port.unwrap_or(rups::DEFAULT_PORT))
                    .try_into()
                    .unwrap_or_default(),
            )
            .with_auth(auth)
            .with_ssl(self.enable_tls.unwrap_or(false))
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MonitoringMode {
    #[default]
    Polling,
    EventDriven,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NutMonitoringConfig {
    enabled: Option<bool>,
    server: Option<NutServerConfig>,
    monitoring_mode: Option<MonitoringMode>,
    poll_interval_seconds: Option<u64>,
    poll_interval_fallback_seconds: Option<u64>,
    sample_interval_seconds: Option<u64>,
    event_driven_heartbeat_seconds: Option<u64>,
    event_driven_fallback: Option<bool>,
}

impl Example for NutMonitoringConfig {
    fn example() -> Self {
        Self {
            enabled: Some(true),
            server: Some(NutServerConfig::example()),
            monitoring_mode: Some(MonitoringMode::Polling),
            poll_interval_seconds: Some(5),
            poll_interval_fallback_seconds: Some(60),
            sample_interval_seconds: Some(60),
            event_driven_heartbeat_seconds: Some(30),
            event_driven_fallback: Some(true),
        }
    }
}

impl NutMonitoringConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or_default()
    }

    pub fn server(&self) -> Option<&NutServerConfig> {
        self.server.as_ref()
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode.unwrap_or_default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.unwrap_or(5))
    }

    pub fn poll_interval_fallback(&self) -> Duration {
        Duration::from_secs(self.poll_interval_fallback_seconds.unwrap_or(60))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds.unwrap_or(60))
    }

    pub fn event_driven_heartbeat(&self) -> Duration {
        Duration::from_secs(self.event_driven_heartbeat_seconds.unwrap_or(30))
    }

    pub fn event_driven_fallback(&self) -> bool {
        self.event_driven_fallback.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_formats_as_user_at_host_port() {
        let config = NutServerConfig::example();
        assert_eq!(config.get_server_id(), "ups-monitor@localhost:3493");
    }
}
