/// What the charger reports it is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    /// A charge program is running
    Charging,
    /// The charger is powered but no program is running, or the program has completed
    Idle,
    /// The charger stopped with an error. Carries the raw state byte.
    Fault(u8),
}

impl ChargeState {
    /// The state byte the charger sends while a charge program is running
    pub const CHARGING: u8 = 0x01;
    const IDLE: u8 = 0x02;
    const COMPLETE: u8 = 0x03;

    pub fn is_charging(self) -> bool {
        self == ChargeState::Charging
    }
}

impl From<u8> for ChargeState {
    fn from(raw: u8) -> Self {
        match raw {
            Self::CHARGING => ChargeState::Charging,
            0x00 | Self::IDLE | Self::COMPLETE => ChargeState::Idle,
            other => ChargeState::Fault(other),
        }
    }
}

/// A single reading of the charger's live telemetry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeInfo {
    pub state: ChargeState,
    /// Charge put into the battery so far in mAh
    pub capacity_mah: i32,
    /// Battery voltage in mV
    pub voltage_mv: i32,
    /// Charge current in mA
    pub current_ma: i32,
    /// Time since the charge program started in seconds
    pub elapsed_s: i32,
    /// Charger internal temperature, in whatever unit the charger uses
    pub temp_int: i32,
    /// External temperature probe, in whatever unit the charger uses
    pub temp_ext: i32,
    /// Battery internal resistance in mOhm
    pub impedance_mohm: i32,
    /// Balance port cell voltages in mV. Unconnected cells read 0.
    pub cell_voltage_mv: Vec<i32>,
}

#[test]
fn test_charge_state_from_raw() {
    assert_eq!(ChargeState::from(0x01), ChargeState::Charging);
    assert_eq!(ChargeState::from(0x00), ChargeState::Idle);
    assert_eq!(ChargeState::from(0x02), ChargeState::Idle);
    assert_eq!(ChargeState::from(0x03), ChargeState::Idle);
    assert_eq!(ChargeState::from(0x04), ChargeState::Fault(0x04));
    assert_eq!(ChargeState::from(0xff), ChargeState::Fault(0xff));
}

#[test]
fn test_only_charging_state_is_charging() {
    for raw in 0..=u8::MAX {
        assert_eq!(ChargeState::from(raw).is_charging(), raw == ChargeState::CHARGING);
    }
}
