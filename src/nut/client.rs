// Licensed under the Open Software License version 3.0
//! C1: connects to a NUT server, auto-discovers the UPS, and answers polling
//! queries. Auto-reconnect policy and connection-status bookkeeping live
//! here; the client itself never emits user-facing notifications -- that is
//! strictly the monitor's (C3) responsibility.
#[mockall_double::double]
use super::connection::Connection;
use super::config::NutServerConfig;
use crate::error::CoreError;
use rups::Config;
use std::{cmp::min, collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

const MAX_INITIAL_CONNECT_ATTEMPTS: u32 = 5;

/// Default variables polled when a server config lists none explicitly.
const DEFAULT_VARIABLES_TO_MONITOR: &[&str] = &[
    "ups.status",
    "battery.charge",
    "battery.charge.low",
    "battery.runtime",
    "battery.runtime.low",
    "input.voltage",
    "input.frequency",
    "output.voltage",
    "output.frequency",
    "ups.load",
    "ups.realpower",
    "ups.realpower.nominal",
    "ups.temperature",
    "ups.model",
    "ups.mfr",
];

type CoreResult<T> = Result<T, CoreError>;

/// `{connected, lastError, reconnectAttempts}` as named in the component design.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
}

pub struct NutClient {
    connection: Arc<Mutex<Option<Connection>>>,
    rups_config: Config,
    configured_ups_name: Option<String>,
    /// Cleared on every reconnect so a server that swapped `dummy` for a real
    /// driver gets re-discovered (§4.1 auto-discovery).
    auto_discovered_ups_name: Arc<RwLock<Option<String>>>,
    status: Arc<RwLock<ConnectionStatus>>,
    variables_to_monitor: Vec<String>,
    server_id: String,
}

impl NutClient {
    pub fn new(server_config: &NutServerConfig, variables_to_monitor: Vec<String>) -> Self {
        let variables_to_monitor = if variables_to_monitor.is_empty() {
            DEFAULT_VARIABLES_TO_MONITOR
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            variables_to_monitor
        };
        Self {
            connection: Arc::new(Mutex::new(None)),
            rups_config: server_config.build_rups_config(),
            configured_ups_name: server_config.ups_name().map(String::from),
            auto_discovered_ups_name: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(ConnectionStatus::default())),
            variables_to_monitor,
            server_id: server_config.get_server_id(),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        let mut locked_connection = self.connection.lock().await;
        let connection = locked_connection.take();
        if let Some(mut conn) = connection {
            if conn.get_server_version().await.is_ok() {
                locked_connection.replace(conn);
                return true;
            }
        }
        false
    }

    /// Single connect attempt; updates `status`. Never retries internally.
    async fn try_connect_once(&self) -> CoreResult<()> {
        match Connection::new(&self.rups_config).await {
            Ok(conn) => {
                self.connection.lock().await.replace(conn);
                *self.auto_discovered_ups_name.write().await = None;
                let mut status = self.status.write().await;
                status.connected = true;
                status.last_error = None;
                status.reconnect_attempts = 0;
                Ok(())
            }
            Err(error) => {
                let message = format!("{error:?}");
                let mut status = self.status.write().await;
                status.connected = false;
                status.last_error = Some(message.clone());
                Err(CoreError::TransientIo(message))
            }
        }
    }

    /// Initial connect with capped exponential backoff: `min(2^attempt, 30)s`,
    /// up to 5 attempts. Returns `Err` after exhausting attempts, but the
    /// monitor enters its steady loop regardless (§4.3).
    pub async fn connect_with_backoff(&self) -> CoreResult<()> {
        let mut last_error = CoreError::TransientIo(String::from("no attempt made"));
        for attempt in 0..MAX_INITIAL_CONNECT_ATTEMPTS {
            match self.try_connect_once().await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    last_error = error;
                    self.status.write().await.reconnect_attempts = attempt + 1;
                    let delay_secs = min(2u64.saturating_pow(attempt), 30);
                    tracing::warn!(
                        "Failed to connect to {} (attempt {}/{}), retrying in {}s",
                        self.server_id,
                        attempt + 1,
                        MAX_INITIAL_CONNECT_ATTEMPTS,
                        delay_secs
                    );
                    sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }
        Err(last_error)
    }

    /// Auto-discover the UPS name via `LIST UPS`, picking the first reported
    /// device. Cached until the next reconnect.
    async fn resolve_ups_name(&self) -> CoreResult<String> {
        if let Some(name) = &self.configured_ups_name {
            return Ok(name.clone());
        }
        if let Some(name) = self.auto_discovered_ups_name.read().await.clone() {
            return Ok(name);
        }
        let mut locked_connection = self.connection.lock().await;
        let Some(mut conn) = locked_connection.take() else {
            return Err(CoreError::TransientIo(String::from("not connected")));
        };
        let result = conn.list_ups().await;
        locked_connection.replace(conn);
        match result {
            Ok(upses) => match upses.into_iter().next() {
                Some((name, _description)) => {
                    *self.auto_discovered_ups_name.write().await = Some(name.clone());
                    Ok(name)
                }
                None => Err(CoreError::Protocol(String::from("no UPS reported"))),
            },
            Err(error) => Err(CoreError::Protocol(format!("{error:?}"))),
        }
    }

    /// Issue one `GET VAR` per monitored variable and return the assembled
    /// map, as if `LIST VAR <ups>` had been parsed. Any failure resolving the
    /// UPS name or the connection marks the connection lost and returns an
    /// empty map, per §4.1 failure semantics.
    pub async fn list_vars(&self) -> HashMap<String, String> {
        let ups_name = match self.resolve_ups_name().await {
            Ok(name) => name,
            Err(error) => {
                self.mark_disconnected(error).await;
                return HashMap::new();
            }
        };

        let mut locked_connection = self.connection.lock().await;
        let Some(mut conn) = locked_connection.take() else {
            drop(locked_connection);
            self.mark_disconnected(CoreError::TransientIo(String::from("not connected")))
                .await;
            return HashMap::new();
        };

        let mut map = HashMap::with_capacity(self.variables_to_monitor.len());
        let mut any_success = false;
        for variable in &self.variables_to_monitor {
            match conn.get_var(&ups_name, variable).await {
                Ok(value) => {
                    any_success = true;
                    map.insert(variable.clone(), value.value());
                }
                Err(error) => {
                    tracing::trace!("Failed to read {} from {}: {:?}", variable, ups_name, error);
                }
            }
        }
        locked_connection.replace(conn);
        drop(locked_connection);

        if any_success {
            self.status.write().await.connected = true;
            map
        } else {
            self.mark_disconnected(CoreError::Protocol(String::from(
                "no variables could be read",
            )))
            .await;
            HashMap::new()
        }
    }

    async fn mark_disconnected(&self, error: CoreError) {
        let mut status = self.status.write().await;
        status.connected = false;
        status.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Example;

    #[tokio::test]
    async fn connects_and_reports_status() {
        let config = NutServerConfig::example();
        let client = NutClient::new(&config, vec![]);
        assert!(!client.is_connected().await);
        client.connect_with_backoff().await.unwrap();
        assert!(client.is_connected().await);
        assert!(client.status().await.connected);
    }

    #[tokio::test]
    async fn list_vars_returns_mock_telemetry() {
        let config = NutServerConfig::example();
        let client = NutClient::new(
            &config,
            vec![String::from("ups.status"), String::from("battery.charge")],
        );
        client.connect_with_backoff().await.unwrap();
        let vars = client.list_vars().await;
        assert_eq!(vars.get("ups.status").map(String::as_str), Some("OL"));
        assert_eq!(
            vars.get("battery.charge").map(String::as_str),
            Some("100")
        );
    }

    #[tokio::test]
    async fn list_vars_without_connection_returns_empty_map() {
        let config = NutServerConfig::example();
        let client = NutClient::new(&config, vec![]);
        let vars = client.list_vars().await;
        assert!(vars.is_empty());
    }
}
