use crate::charge_info::{ChargeInfo, ChargeState};
use crate::charger_client::ChargerError;

/// The command byte which requests the live charge data
pub(crate) const COMMAND: u8 = 0x55;

const BODY_LEN: usize = 25;
const CELL_COUNT: usize = 6;

/// A message type which contains the live state of the running charge program.
///
/// Body layout, multi-byte values big-endian:
///
/// Offset | Size | Meaning
/// 0      | 1    | State
/// 1      | 2    | Capacity (mAh)
/// 3      | 2    | Elapsed time (s)
/// 5      | 2    | Voltage (mV)
/// 7      | 2    | Current (mA)
/// 9      | 1    | External temperature
/// 10     | 1    | Internal temperature
/// 11     | 2    | Impedance (mOhm)
/// 13     | 12   | Cell voltages (mV), 6 cells
pub(crate) struct ChargeInfoMessage<'a>(&'a [u8]);

impl<'a> ChargeInfoMessage<'a> {
    pub fn new(body: &'a [u8]) -> Result<Self, ChargerError> {
        if body.len() < BODY_LEN {
            return Err(ChargerError::BodyTooShort {
                command: COMMAND,
                len: body.len(),
                expected: BODY_LEN,
            });
        }
        Ok(Self(body))
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    pub fn state(&self) -> ChargeState {
        ChargeState::from(self.0[0])
    }

    pub fn capacity_mah(&self) -> u16 {
        self.u16_at(1)
    }

    pub fn elapsed_s(&self) -> u16 {
        self.u16_at(3)
    }

    pub fn voltage_mv(&self) -> u16 {
        self.u16_at(5)
    }

    pub fn current_ma(&self) -> u16 {
        self.u16_at(7)
    }

    pub fn temp_ext(&self) -> u8 {
        self.0[9]
    }

    pub fn temp_int(&self) -> u8 {
        self.0[10]
    }

    pub fn impedance_mohm(&self) -> u16 {
        self.u16_at(11)
    }

    pub fn cell_voltage_mv(&self) -> Vec<u16> {
        (0..CELL_COUNT).map(|i| self.u16_at(13 + 2 * i)).collect()
    }

    pub fn to_charge_info(&self) -> ChargeInfo {
        ChargeInfo {
            state: self.state(),
            capacity_mah: self.capacity_mah().into(),
            voltage_mv: self.voltage_mv().into(),
            current_ma: self.current_ma().into(),
            elapsed_s: self.elapsed_s().into(),
            temp_int: self.temp_int().into(),
            temp_ext: self.temp_ext().into(),
            impedance_mohm: self.impedance_mohm().into(),
            cell_voltage_mv: self.cell_voltage_mv().into_iter().map(i32::from).collect(),
        }
    }
}

#[test]
fn test_charge_info_fields() {
    let body = hex::decode("0108980e1020d001f41c21003c0ff00fec0000000000000000").unwrap();
    let info = ChargeInfoMessage::new(&body).unwrap().to_charge_info();
    assert_eq!(
        info,
        ChargeInfo {
            state: ChargeState::Charging,
            capacity_mah: 2200,
            voltage_mv: 8400,
            current_ma: 500,
            elapsed_s: 3600,
            temp_int: 33,
            temp_ext: 28,
            impedance_mohm: 60,
            cell_voltage_mv: vec![4080, 4076, 0, 0, 0, 0],
        }
    );
}

#[test]
fn test_charge_info_keeps_full_unsigned_range() {
    let mut body = vec![0x00];
    body.extend_from_slice(&[0xff; 24]);
    let info = ChargeInfoMessage::new(&body).unwrap().to_charge_info();
    assert_eq!(info.capacity_mah, 65535);
    assert_eq!(info.voltage_mv, 65535);
    assert_eq!(info.temp_int, 255);
    assert_eq!(info.cell_voltage_mv, vec![65535; 6]);
}

#[test]
fn test_charge_info_body_too_short() {
    let body = [0x01, 0x08, 0x98];
    let result = ChargeInfoMessage::new(&body);
    assert!(matches!(
        result,
        Err(ChargerError::BodyTooShort { command: COMMAND, len: 3, expected: BODY_LEN })
    ));
}
