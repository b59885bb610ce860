//! Turning a charge reading into the strings shown on the console and published to the broker.

use crate::charge_info::ChargeInfo;

/// Topics the readings are published on
pub mod topic {
    pub const STATUS: &str = "/accucell/status";
    pub const CAPACITY: &str = "/accucell/capacity";
    pub const VOLTAGE: &str = "/accucell/voltage";
    pub const CURRENT: &str = "/accucell/current";
    pub const DURATION: &str = "/accucell/duration";
    pub const INT_TEMP: &str = "/accucell/int_temp";
}

/// The value published on the status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Charging,
    NotCharging,
    /// The charger could not be read. Never derived from a successful read.
    Stopped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Charging => "Charging",
            Status::NotCharging => "Not charging",
            Status::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A charge reading rendered for display and publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub status: Status,
    pub capacity: String,
    pub voltage: String,
    pub current: String,
    pub duration: String,
    pub int_temp: String,
}

impl Reading {
    pub fn new(info: &ChargeInfo) -> Self {
        let status = if info.state.is_charging() {
            Status::Charging
        } else {
            Status::NotCharging
        };

        Self {
            status,
            capacity: info.capacity_mah.to_string(),
            voltage: format_volts(info.voltage_mv),
            current: format_amps(info.current_ma),
            duration: info.elapsed_s.to_string(),
            int_temp: info.temp_int.to_string(),
        }
    }

    /// Topic and payload of every message for this reading, in publishing order
    pub fn messages(&self) -> [(&'static str, &str); 6] {
        [
            (topic::STATUS, self.status.as_str()),
            (topic::CAPACITY, &self.capacity),
            (topic::VOLTAGE, &self.voltage),
            (topic::CURRENT, &self.current),
            (topic::DURATION, &self.duration),
            (topic::INT_TEMP, &self.int_temp),
        ]
    }

    /// One labelled console line per field, each prefixed with `timestamp`
    pub fn console_lines(&self, timestamp: &str) -> [String; 6] {
        [
            format!("{timestamp} Status: {}", self.status),
            format!("{timestamp} mAh: {}", self.capacity),
            format!("{timestamp} Voltage: {}", self.voltage),
            format!("{timestamp} Current: {}", self.current),
            format!("{timestamp} Duration: {}", self.duration),
            format!("{timestamp} Int temp: {}", self.int_temp),
        ]
    }
}

/// mV as volts with three decimals
fn format_volts(mv: i32) -> String {
    format!("{:.3}", f64::from(mv) / 1000.0)
}

/// mA as amps with one decimal
fn format_amps(ma: i32) -> String {
    format!("{:.1}", f64::from(ma) / 1000.0)
}

#[cfg(test)]
use crate::charge_info::ChargeState;

#[cfg(test)]
fn snapshot(state: ChargeState) -> ChargeInfo {
    ChargeInfo {
        state,
        capacity_mah: 2200,
        voltage_mv: 8400,
        current_ma: 500,
        elapsed_s: 3600,
        temp_int: 25,
        temp_ext: 0,
        impedance_mohm: 0,
        cell_voltage_mv: vec![0; 6],
    }
}

#[cfg(test)]
fn fraction_digits(s: &str) -> usize {
    s.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}

#[test]
fn test_reading_from_charging_snapshot() {
    let reading = Reading::new(&snapshot(ChargeState::Charging));
    assert_eq!(
        reading.messages(),
        [
            ("/accucell/status", "Charging"),
            ("/accucell/capacity", "2200"),
            ("/accucell/voltage", "8.400"),
            ("/accucell/current", "0.5"),
            ("/accucell/duration", "3600"),
            ("/accucell/int_temp", "25"),
        ]
    );
}

#[test]
fn test_only_charging_state_reports_charging() {
    for raw in 0..=u8::MAX {
        let reading = Reading::new(&snapshot(ChargeState::from(raw)));
        if raw == ChargeState::CHARGING {
            assert_eq!(reading.status, Status::Charging);
        } else {
            assert_eq!(reading.status, Status::NotCharging);
        }
    }
}

#[test]
fn test_voltage_has_three_decimals() {
    for mv in [0, 1, -1, 999, 1000, 8400, 12_345, -8400, i32::from(u16::MAX)] {
        let volts = format_volts(mv);
        assert_eq!(fraction_digits(&volts), 3, "{mv} -> {volts}");
    }
    assert_eq!(format_volts(0), "0.000");
    assert_eq!(format_volts(4187), "4.187");
    assert_eq!(format_volts(-1500), "-1.500");
}

#[test]
fn test_current_has_one_decimal() {
    for ma in [0, 1, -1, 100, 500, 5000, -2000, i32::from(u16::MAX)] {
        let amps = format_amps(ma);
        assert_eq!(fraction_digits(&amps), 1, "{ma} -> {amps}");
    }
    assert_eq!(format_amps(0), "0.0");
    assert_eq!(format_amps(2000), "2.0");
    assert_eq!(format_amps(-2000), "-2.0");
}

#[test]
fn test_integers_render_as_plain_decimal() {
    let mut info = snapshot(ChargeState::Idle);
    info.capacity_mah = 0;
    info.elapsed_s = -42;
    info.temp_int = 7;
    let reading = Reading::new(&info);
    assert_eq!(reading.capacity, "0");
    assert_eq!(reading.duration, "-42");
    assert_eq!(reading.int_temp, "7");
}

#[test]
fn test_console_lines_are_labelled() {
    let reading = Reading::new(&snapshot(ChargeState::Idle));
    let lines = reading.console_lines("10/19/26 12:00:00");
    assert_eq!(lines[0], "10/19/26 12:00:00 Status: Not charging");
    assert_eq!(lines[1], "10/19/26 12:00:00 mAh: 2200");
    assert_eq!(lines[2], "10/19/26 12:00:00 Voltage: 8.400");
    assert_eq!(lines[3], "10/19/26 12:00:00 Current: 0.5");
    assert_eq!(lines[4], "10/19/26 12:00:00 Duration: 3600");
    assert_eq!(lines[5], "10/19/26 12:00:00 Int temp: 25");
}

#[test]
fn test_stopped_is_never_derived_from_a_reading() {
    for raw in 0..=u8::MAX {
        let reading = Reading::new(&snapshot(ChargeState::from(raw)));
        assert_ne!(reading.status, Status::Stopped);
    }
}
