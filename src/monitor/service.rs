// Licensed under the Open Software License version 3.0
//! C3: the steady-state loop. Connects to the configured NUT server, keeps a
//! typed snapshot up to date (by polling or by reacting to `DATACHANGED`),
//! drives the shutdown manager's power-lost/power-restored edges, and
//! samples periodic stats.
use crate::events::{DomainEvent, EventBus, EventKind, StatusChanged};
use crate::nut::client::NutClient;
use crate::nut::config::{MonitoringMode, NutMonitoringConfig, NutServerConfig};
use crate::nut::listen::run_event_driven_listener;
use crate::nut::protocol::{parse_snapshot, UpsSnapshot, UpsStatus};
use crate::shutdown::manager::ShutdownManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;

const SECONDS_PER_DAY: u64 = 86_400;

fn unix_day(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() / SECONDS_PER_DAY
}

/// Running aggregate of one calendar day's telemetry, rebuilt whenever the
/// day number changes.
#[derive(Debug, Clone, Default)]
struct DailyStats {
    day: u64,
    samples: u64,
    min_battery_charge: Option<f64>,
    max_battery_charge: Option<f64>,
    power_lost_events: u64,
}

impl DailyStats {
    fn for_day(day: u64) -> Self {
        Self {
            day,
            ..Default::default()
        }
    }

    fn record_sample(&mut self, snapshot: &UpsSnapshot) {
        self.samples += 1;
        if let Some(charge) = snapshot.battery_charge_percent {
            self.min_battery_charge = Some(self.min_battery_charge.map_or(charge, |m| m.min(charge)));
            self.max_battery_charge = Some(self.max_battery_charge.map_or(charge, |m| m.max(charge)));
        }
    }
}

pub struct MonitorService {
    client: Arc<NutClient>,
    monitoring: NutMonitoringConfig,
    events: Arc<EventBus>,
    shutdown_manager: Arc<ShutdownManager>,
    latest_snapshot: Arc<RwLock<Option<UpsSnapshot>>>,
    nut_reconnect_count: Arc<AtomicU32>,
    /// Set once a disconnect has been reported so repeated poll failures
    /// don't re-notify every tick; cleared the moment the connection recovers.
    connection_notified: Arc<RwLock<bool>>,
    daily_stats: Arc<RwLock<DailyStats>>,
}

impl MonitorService {
    pub fn new(
        server_config: &NutServerConfig,
        monitoring: NutMonitoringConfig,
        variables_to_monitor: Vec<String>,
        events: Arc<EventBus>,
        shutdown_manager: Arc<ShutdownManager>,
        latest_snapshot: Arc<RwLock<Option<UpsSnapshot>>>,
    ) -> Self {
        Self {
            client: Arc::new(NutClient::new(server_config, variables_to_monitor)),
            monitoring,
            events,
            shutdown_manager,
            latest_snapshot,
            nut_reconnect_count: Arc::new(AtomicU32::new(0)),
            connection_notified: Arc::new(RwLock::new(false)),
            daily_stats: Arc::new(RwLock::new(DailyStats::for_day(unix_day(SystemTime::now())))),
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.client.connect_with_backoff().await.is_err() {
            tracing::error!("Could not reach the NUT server after the initial connect budget; continuing to retry in the background");
        }

        self.events.publish_domain_event(
            DomainEvent::new(EventKind::Startup, "monitor starting up")
                .with_metadata(HashMap::from([(
                    String::from("trigger"),
                    String::from("startup_detection"),
                )])),
        );
        self.poll_once().await;

        let sample_handle = {
            let this_latest = self.latest_snapshot.clone();
            let this_daily = self.daily_stats.clone();
            let sample_interval = self.monitoring.sample_interval();
            let mut shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                let mut ticker = interval(sample_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Some(snapshot) = this_latest.read().await.clone() {
                                let day = unix_day(SystemTime::now());
                                let mut stats = this_daily.write().await;
                                if stats.day != day {
                                    *stats = DailyStats::for_day(day);
                                }
                                stats.record_sample(&snapshot);
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            })
        };

        match self.monitoring.monitoring_mode() {
            MonitoringMode::Polling => self.run_polling_loop(shutdown_rx).await,
            MonitoringMode::EventDriven => self.run_event_driven_loop(shutdown_rx).await,
            MonitoringMode::Hybrid => self.run_hybrid_loop(shutdown_rx).await,
        }

        sample_handle.abort();
    }

    async fn run_polling_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.monitoring.poll_interval());
        let mut disconnect_attempt: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.recv() => break,
            }

            let connected_before = self.poll_once().await;
            if connected_before {
                disconnect_attempt = 0;
            } else {
                let delay = self.disconnect_reconnect_delay(disconnect_attempt);
                disconnect_attempt = disconnect_attempt.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
    }

    /// `(n+1)*5s` for n=0..4, then 60s, matching the polling-mode disconnect
    /// reconnect schedule.
    fn disconnect_reconnect_delay(&self, attempt: u32) -> Duration {
        if attempt < 5 {
            Duration::from_secs((attempt as u64 + 1) * 5)
        } else {
            Duration::from_secs(60)
        }
    }

    /// Drives the `DATACHANGED` listener. Alongside it, runs a slow sanity
    /// probe at `pollIntervalFallbackSeconds` so a silently wedged listener
    /// still produces telemetry, and falls back to full polling if the
    /// listener exhausts its relisten budget rather than going dark forever.
    async fn run_event_driven_loop(&self, shutdown_rx: broadcast::Receiver<()>) {
        let (data_changed_tx, mut data_changed_rx) = mpsc::channel::<()>(16);
        let server_config = self.server_config_for_listener();

        let listener_shutdown_rx = shutdown_rx.resubscribe();
        let mut listener_handle = {
            let server_config = server_config.clone();
            let heartbeat = self.monitoring.event_driven_heartbeat();
            tokio::spawn(async move {
                run_event_driven_listener(
                    server_config.0,
                    server_config.1,
                    server_config.2,
                    server_config.3,
                    heartbeat,
                    data_changed_tx,
                    listener_shutdown_rx,
                )
                .await
            })
        };

        let mut shutdown_rx = shutdown_rx;
        let mut fallback_ticker = interval(self.monitoring.poll_interval_fallback());
        fallback_ticker.tick().await;

        loop {
            tokio::select! {
                signal = data_changed_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    self.poll_once().await;
                }
                _ = fallback_ticker.tick() => {
                    self.poll_once().await;
                }
                result = &mut listener_handle => {
                    match result {
                        Ok(Ok(())) => break,
                        Ok(Err(error)) => {
                            tracing::error!(
                                "Event-driven listener exhausted its reconnect budget: {}; falling back to polling",
                                error
                            );
                            self.run_polling_loop(shutdown_rx).await;
                            return;
                        }
                        Err(join_error) => {
                            tracing::error!(
                                "Event-driven listener task failed: {}; falling back to polling",
                                join_error
                            );
                            self.run_polling_loop(shutdown_rx).await;
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        listener_handle.abort();
    }

    async fn run_hybrid_loop(&self, shutdown_rx: broadcast::Receiver<()>) {
        if self.monitoring.event_driven_fallback() {
            self.run_event_driven_loop(shutdown_rx).await;
        } else {
            self.run_polling_loop(shutdown_rx).await;
        }
    }

    fn server_config_for_listener(&self) -> (NutServerConfig, Option<String>, Option<String>, String) {
        let server = self
            .monitoring
            .server()
            .cloned()
            .expect("event-driven mode requires a configured server");
        let username = server.username().map(String::from);
        let password = server.password().map(String::from);
        let ups_name = server.ups_name().map(String::from).unwrap_or_default();
        (server, username, password, ups_name)
    }

    /// Reads one snapshot, publishes it, and drives the shutdown manager's
    /// power-lost/power-restored edges. Returns whether the read succeeded.
    async fn poll_once(&self) -> bool {
        let vars = self.client.list_vars().await;
        if vars.is_empty() {
            self.handle_disconnect().await;
            return false;
        }
        self.handle_reconnect().await;

        let snapshot = parse_snapshot(&vars, self.nut_reconnect_count.load(Ordering::SeqCst));
        let previous = self.latest_snapshot.read().await.clone();
        *self.latest_snapshot.write().await = Some(snapshot.clone());
        self.events.publish_snapshot(snapshot.clone());

        let previous_status = previous.as_ref().map(|s| s.status);
        if previous_status != Some(snapshot.status) {
            self.events.publish_status_changed(StatusChanged {
                previous: previous_status,
                current: snapshot.status,
            });
            self.handle_status_transition(previous_status, snapshot.status).await;
        }

        true
    }

    async fn handle_status_transition(&self, previous: Option<UpsStatus>, current: UpsStatus) {
        match current {
            UpsStatus::OnBattery | UpsStatus::LowBattery => {
                if !matches!(previous, Some(UpsStatus::OnBattery) | Some(UpsStatus::LowBattery)) {
                    self.events
                        .publish_domain_event(DomainEvent::new(EventKind::PowerLost, "power lost, UPS on battery"));
                }
                if current == UpsStatus::LowBattery {
                    self.events
                        .publish_domain_event(DomainEvent::new(EventKind::LowBattery, "battery low"));
                }
                self.shutdown_manager.on_power_lost().await;
            }
            UpsStatus::Online => {
                if matches!(previous, Some(UpsStatus::OnBattery) | Some(UpsStatus::LowBattery)) {
                    self.events
                        .publish_domain_event(DomainEvent::new(EventKind::PowerRestored, "power restored"));
                }
                self.shutdown_manager.on_power_restored().await;
            }
            _ => {}
        }
    }

    async fn handle_disconnect(&self) {
        let mut notified = self.connection_notified.write().await;
        if !*notified {
            self.nut_reconnect_count.fetch_add(1, Ordering::SeqCst);
            self.events
                .publish_domain_event(DomainEvent::new(EventKind::NutDisconnected, "lost connection to NUT server"));
            *notified = true;
        }
    }

    async fn handle_reconnect(&self) {
        let mut notified = self.connection_notified.write().await;
        if *notified {
            self.nut_reconnect_count.store(0, Ordering::SeqCst);
            self.events
                .publish_domain_event(DomainEvent::new(EventKind::NutReconnected, "reconnected to NUT server"));
            *notified = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_schedule_matches_spec() {
        let service_delay = |attempt: u32| -> Duration {
            if attempt < 5 {
                Duration::from_secs((attempt as u64 + 1) * 5)
            } else {
                Duration::from_secs(60)
            }
        };
        let delays: Vec<u64> = (0..6).map(|n| service_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 15, 20, 25, 60]);
    }

    #[test]
    fn daily_stats_track_charge_extremes() {
        let mut stats = DailyStats::for_day(1);
        let mut vars = HashMap::new();
        vars.insert("ups.status".to_string(), "OL".to_string());
        vars.insert("battery.charge".to_string(), "80".to_string());
        stats.record_sample(&parse_snapshot(&vars, 0));
        vars.insert("battery.charge".to_string(), "60".to_string());
        stats.record_sample(&parse_snapshot(&vars, 0));
        assert_eq!(stats.min_battery_charge, Some(60.0));
        assert_eq!(stats.max_battery_charge, Some(80.0));
        assert_eq!(stats.samples, 2);
    }
}
