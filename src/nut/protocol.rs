// Licensed under the Open Software License version 3.0
//! Pure mapping from a raw NUT variable map to a typed snapshot (C2).
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsStatus {
    Online,
    OnBattery,
    LowBattery,
    ShuttingDown,
    PowerOff,
    Offline,
}

impl UpsStatus {
    /// Derive a status from NUT's whitespace-separated `ups.status` flag string.
    ///
    /// Priority is `OL > OB > LB`: `OL` always wins regardless of what else is
    /// present, `OB` without `LB` is on-battery, `OB LB` or bare `LB` is low
    /// battery, and the absence of both `OL` and `OB` means offline.
    pub fn from_flags(flags: &[String]) -> Self {
        let has = |flag: &str| flags.iter().any(|f| f == flag);
        if has("OL") {
            UpsStatus::Online
        } else if has("OB") {
            if has("LB") {
                UpsStatus::LowBattery
            } else {
                UpsStatus::OnBattery
            }
        } else if has("LB") {
            UpsStatus::LowBattery
        } else {
            UpsStatus::Offline
        }
    }
}

/// An immutable, timestamped parse of a UPS's NUT variables.
///
/// Unknown optional fields are always carried as `None`, never as a
/// synthesized zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsSnapshot {
    pub status: UpsStatus,
    pub raw_status: String,
    pub status_flags: Vec<String>,
    pub captured_at_unix_ms: u128,
    pub nut_reconnect_count: u32,

    pub battery_charge_percent: Option<f64>,
    pub battery_runtime_seconds: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub battery_voltage_nominal: Option<f64>,
    pub battery_temperature: Option<f64>,
    pub battery_type: Option<String>,
    pub battery_date: Option<String>,
    pub battery_mfr_date: Option<String>,
    pub battery_packs: Option<f64>,
    pub battery_packs_bad: Option<f64>,
    pub battery_charger_status: Option<String>,

    pub input_voltage: Option<f64>,
    pub input_voltage_nominal: Option<f64>,
    pub input_voltage_minimum: Option<f64>,
    pub input_voltage_maximum: Option<f64>,
    pub input_frequency: Option<f64>,
    pub input_transfer_low: Option<f64>,
    pub input_transfer_high: Option<f64>,
    pub input_transfer_reason: Option<String>,
    pub input_sensitivity: Option<String>,

    pub output_voltage: Option<f64>,
    pub output_frequency: Option<f64>,
    pub output_current: Option<f64>,
    pub output_current_nominal: Option<f64>,

    pub ups_load_percent: Option<f64>,
    pub ups_temperature: Option<f64>,
    pub ups_realpower: Option<f64>,
    pub ups_realpower_nominal: Option<f64>,
    pub ups_power_nominal: Option<f64>,
    pub ups_efficiency: Option<f64>,
    pub ups_model: Option<String>,
    pub ups_mfr: Option<String>,
    pub ups_serial: Option<String>,
    pub ups_productid: Option<String>,
    pub ups_vendorid: Option<String>,
    pub ups_test_result: Option<String>,
    pub ups_test_date: Option<String>,
    pub ups_alarm: Option<String>,
    pub ups_beeper_status: Option<String>,
    pub ups_delay_shutdown: Option<f64>,

    pub ambient_temperature: Option<f64>,
    pub ambient_humidity: Option<f64>,
}

fn get(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key).cloned()
}

fn get_numeric(vars: &HashMap<String, String>, key: &str) -> Option<f64> {
    vars.get(key).and_then(|v| v.parse::<f64>().ok())
}

fn captured_at_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Build a snapshot from a raw NUT variable map plus the monitor's current
/// reconnect counter. Pure: no I/O, no clock other than the capture timestamp.
pub fn parse_snapshot(vars: &HashMap<String, String>, nut_reconnect_count: u32) -> UpsSnapshot {
    let raw_status = get(vars, "ups.status").unwrap_or_default();
    let status_flags: Vec<String> = raw_status
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let status = UpsStatus::from_flags(&status_flags);

    // device.model/device.mfr take priority, falling back to ups.model/ups.mfr.
    let ups_model = get(vars, "device.model").or_else(|| get(vars, "ups.model"));
    let ups_mfr = get(vars, "device.mfr").or_else(|| get(vars, "ups.mfr"));

    UpsSnapshot {
        status,
        raw_status,
        status_flags,
        captured_at_unix_ms: captured_at_unix_ms(),
        nut_reconnect_count,

        battery_charge_percent: get_numeric(vars, "battery.charge"),
        battery_runtime_seconds: get_numeric(vars, "battery.runtime"),
        battery_voltage: get_numeric(vars, "battery.voltage"),
        battery_voltage_nominal: get_numeric(vars, "battery.voltage.nominal"),
        battery_temperature: get_numeric(vars, "battery.temperature"),
        battery_type: get(vars, "battery.type"),
        battery_date: get(vars, "battery.date"),
        battery_mfr_date: get(vars, "battery.mfr.date"),
        battery_packs: get_numeric(vars, "battery.packs"),
        battery_packs_bad: get_numeric(vars, "battery.packs.bad"),
        battery_charger_status: get(vars, "battery.charger.status"),

        input_voltage: get_numeric(vars, "input.voltage"),
        input_voltage_nominal: get_numeric(vars, "input.voltage.nominal"),
        input_voltage_minimum: get_numeric(vars, "input.voltage.minimum"),
        input_voltage_maximum: get_numeric(vars, "input.voltage.maximum"),
        input_frequency: get_numeric(vars, "input.frequency"),
        input_transfer_low: get_numeric(vars, "input.transfer.low"),
        input_transfer_high: get_numeric(vars, "input.transfer.high"),
        input_transfer_reason: get(vars, "input.transfer.reason"),
        input_sensitivity: get(vars, "input.sensitivity"),

        output_voltage: get_numeric(vars, "output.voltage"),
        output_frequency: get_numeric(vars, "output.frequency"),
        output_current: get_numeric(vars, "output.current"),
        output_current_nominal: get_numeric(vars, "output.current.nominal"),

        ups_load_percent: get_numeric(vars, "ups.load"),
        ups_temperature: get_numeric(vars, "ups.temperature"),
        ups_realpower: get_numeric(vars, "ups.realpower"),
        ups_realpower_nominal: get_numeric(vars, "ups.realpower.nominal"),
        ups_power_nominal: get_numeric(vars, "ups.power.nominal"),
        ups_efficiency: get_numeric(vars, "ups.efficiency"),
        ups_model,
        ups_mfr,
        ups_serial: get(vars, "ups.serial"),
        ups_productid: get(vars, "ups.productid"),
        ups_vendorid: get(vars, "ups.vendorid"),
        ups_test_result: get(vars, "ups.test.result"),
        ups_test_date: get(vars, "ups.test.date"),
        ups_alarm: get(vars, "ups.alarm"),
        ups_beeper_status: get(vars, "ups.beeper.status"),
        ups_delay_shutdown: get_numeric(vars, "ups.delay.shutdown"),

        ambient_temperature: get_numeric(vars, "ambient.temperature"),
        ambient_humidity: get_numeric(vars, "ambient.humidity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ol_always_wins() {
        assert_eq!(
            UpsStatus::from_flags(&["OL".into(), "OB".into(), "LB".into()]),
            UpsStatus::Online
        );
        assert_eq!(UpsStatus::from_flags(&["OL".into()]), UpsStatus::Online);
    }

    #[test]
    fn ob_without_lb_is_on_battery() {
        assert_eq!(UpsStatus::from_flags(&["OB".into()]), UpsStatus::OnBattery);
    }

    #[test]
    fn ob_with_lb_is_low_battery() {
        assert_eq!(
            UpsStatus::from_flags(&["OB".into(), "LB".into()]),
            UpsStatus::LowBattery
        );
        assert_eq!(UpsStatus::from_flags(&["LB".into()]), UpsStatus::LowBattery);
    }

    #[test]
    fn neither_ol_nor_ob_is_offline() {
        assert_eq!(UpsStatus::from_flags(&[]), UpsStatus::Offline);
        assert_eq!(
            UpsStatus::from_flags(&["RB".into(), "CHRG".into()]),
            UpsStatus::Offline
        );
    }

    #[test]
    fn parses_numerics_leniently() {
        let v = vars(&[
            ("ups.status", "OB LB"),
            ("battery.charge", "42"),
            ("battery.runtime", "not-a-number"),
        ]);
        let snap = parse_snapshot(&v, 0);
        assert_eq!(snap.status, UpsStatus::LowBattery);
        assert_eq!(snap.battery_charge_percent, Some(42.0));
        assert_eq!(snap.battery_runtime_seconds, None);
        assert_eq!(snap.status_flags, vec!["OB", "LB"]);
    }

    #[test]
    fn missing_fields_are_absent_not_zero() {
        let v = vars(&[("ups.status", "OL")]);
        let snap = parse_snapshot(&v, 0);
        assert_eq!(snap.battery_charge_percent, None);
        assert_eq!(snap.ups_load_percent, None);
    }

    #[test]
    fn model_falls_back_from_device_to_ups() {
        let v = vars(&[("ups.status", "OL"), ("ups.model", "Smart-UPS 1500")]);
        let snap = parse_snapshot(&v, 0);
        assert_eq!(snap.ups_model.as_deref(), Some("Smart-UPS 1500"));

        let v2 = vars(&[
            ("ups.status", "OL"),
            ("device.model", "Smart-UPS 1500 RM"),
            ("ups.model", "Smart-UPS 1500"),
        ]);
        let snap2 = parse_snapshot(&v2, 0);
        assert_eq!(snap2.ups_model.as_deref(), Some("Smart-UPS 1500 RM"));
    }

    #[test]
    fn reconnect_count_is_carried_through() {
        let v = vars(&[("ups.status", "OL")]);
        let snap = parse_snapshot(&v, 3);
        assert_eq!(snap.nut_reconnect_count, 3);
    }
}
