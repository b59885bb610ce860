use crate::charger_client::ChargerError;

/// The command byte which requests the device information block
pub(crate) const COMMAND: u8 = 0x57;

const BODY_LEN: usize = 14;

/// Identification data the charger reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Charger core type, e.g. "100069"
    pub core_type: String,
    pub customer_id: u16,
    pub sw_version: String,
    pub hw_version: u8,
}

/// A message type which contains the device information block.
///
/// Bytes 0-5 are the ASCII core type, 8-9 the customer id, 11-12 the
/// software version (major, minor) and 13 the hardware version.
pub(crate) struct DevInfoMessage<'a>(&'a [u8]);

impl<'a> DevInfoMessage<'a> {
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

    pub fn core_type(&self) -> String {
        String::from_utf8_lossy(&self.0[0..6])
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    pub fn customer_id(&self) -> u16 {
        u16::from_be_bytes([self.0[8], self.0[9]])
    }

    pub fn sw_version(&self) -> String {
        format!("{}.{:02}", self.0[11], self.0[12])
    }

    pub fn hw_version(&self) -> u8 {
        self.0[13]
    }

    pub fn to_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            core_type: self.core_type(),
            customer_id: self.customer_id(),
            sw_version: self.sw_version(),
            hw_version: self.hw_version(),
        }
    }
}

#[test]
fn test_dev_info_fields() {
    let mut body = b"100069".to_vec();
    body.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x05, 0x02]);
    let info = DevInfoMessage::new(&body).unwrap().to_device_info();
    assert_eq!(
        info,
        DeviceInfo {
            core_type: "100069".to_string(),
            customer_id: 1,
            sw_version: "1.05".to_string(),
            hw_version: 2,
        }
    );
}

#[test]
fn test_dev_info_core_type_trims_padding() {
    let mut body = b"B6\0\0\0\0".to_vec();
    body.extend_from_slice(&[0; 8]);
    let info = DevInfoMessage::new(&body).unwrap().to_device_info();
    assert_eq!(info.core_type, "B6");
}

#[test]
fn test_dev_info_body_too_short() {
    let result = DevInfoMessage::new(b"1000");
    assert!(matches!(result, Err(ChargerError::BodyTooShort { .. })));
}
