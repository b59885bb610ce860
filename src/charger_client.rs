//! Read live charge data from a Turnigy Accucell 6 (or compatible "B6") charger over USB
//!
//! The charger enumerates as a vendor-specific USB device with a single interface and a pair
//! of interrupt endpoints. Every exchange is one 64 byte request packet followed by one 64 byte
//! response packet.
//!
//! Currently the following commands are used:
//!
//! - Device information (handshake on open)
//! - Charge information (polled)

use std::time::Duration;

use rusb::DeviceHandle;
use rusb::GlobalContext;
use tracing::{debug, info, warn};

use crate::charge_info::ChargeInfo;
use crate::message::charge_info_message::{self, ChargeInfoMessage};
use crate::message::dev_info_message::{self, DevInfoMessage, DeviceInfo};

/// Errors talking to the charger
#[derive(Debug, thiserror::Error)]
pub enum ChargerError {
    #[error("No charger found (USB {vendor_id:04x}:{product_id:04x})")]
    NotFound { vendor_id: u16, product_id: u16 },
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("Short write: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },
    #[error("Message incomplete: {0}")]
    Incomplete(String),
    #[error("Message invalid: {reason}: {frame}")]
    Invalid { reason: &'static str, frame: String },
    #[error("Unexpected response to command 0x{expected:02x}: got 0x{actual:02x}")]
    UnexpectedCommand { expected: u8, actual: u8 },
    #[error("Response to command 0x{command:02x} too short: {len} bytes, expected {expected}")]
    BodyTooShort {
        command: u8,
        len: usize,
        expected: usize,
    },
}

/// Something that can be asked for the charger's current state
#[allow(async_fn_in_trait)]
pub trait Charger {
    /// Read the current charge state. Every failure is reported, none are retried.
    async fn fetch_charge_info(&mut self) -> Result<ChargeInfo, ChargerError>;
}

/// An open, claimed connection to the charger.
///
/// Dropping the client releases the interface and gives the device back to any kernel driver
/// that was bound to it before.
pub struct ChargerClient {
    handle: DeviceHandle<GlobalContext>,
    reattach_kernel_driver: bool,
    released: bool,
    device_info: Option<DeviceInfo>,
}

impl ChargerClient {
    const VENDOR_ID: u16 = 0x0000;
    const PRODUCT_ID: u16 = 0x0001;
    const INTERFACE: u8 = 0;
    const ENDPOINT_OUT: u8 = 0x01;
    const ENDPOINT_IN: u8 = 0x81;
    const PACKET_LEN: usize = 64;
    const MSG_HEADER: u8 = 0x0f;
    const USB_TIMEOUT: Duration = Duration::from_secs(1);

    /// Open the first attached charger, claim it and perform the device information handshake.
    pub fn open() -> Result<Self, ChargerError> {
        let handle = rusb::open_device_with_vid_pid(Self::VENDOR_ID, Self::PRODUCT_ID).ok_or(
            ChargerError::NotFound {
                vendor_id: Self::VENDOR_ID,
                product_id: Self::PRODUCT_ID,
            },
        )?;

        let reattach_kernel_driver = match handle.kernel_driver_active(Self::INTERFACE) {
            Ok(true) => {
                debug!("CHARGER: detaching kernel driver");
                handle.detach_kernel_driver(Self::INTERFACE)?;
                true
            }
            Ok(false) | Err(rusb::Error::NotSupported) => false,
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = handle.claim_interface(Self::INTERFACE) {
            if reattach_kernel_driver {
                let _ = handle.attach_kernel_driver(Self::INTERFACE);
            }
            return Err(err.into());
        }

        let mut client = Self {
            handle,
            reattach_kernel_driver,
            released: false,
            device_info: None,
        };

        let body = client.request_response(dev_info_message::COMMAND)?;
        let device_info = DevInfoMessage::new(&body)?.to_device_info();
        info!(
            core_type = %device_info.core_type,
            sw_version = %device_info.sw_version,
            hw_version = device_info.hw_version,
            "Connected to charger"
        );
        client.device_info = Some(device_info);

        Ok(client)
    }

    /// What the charger reported about itself when it was opened
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Release the charger
    pub fn stop(mut self) -> Result<(), ChargerError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), ChargerError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        release_interface(&mut self.handle, Self::INTERFACE, self.reattach_kernel_driver)
    }

    fn read_charge_info(&self) -> Result<ChargeInfo, ChargerError> {
        let body = self.request_response(charge_info_message::COMMAND)?;
        let info = ChargeInfoMessage::new(&body)?.to_charge_info();

        debug!(
            temp_ext = info.temp_ext,
            impedance_mohm = info.impedance_mohm,
            cell_voltage_mv = ?info.cell_voltage_mv,
            "CHARGER: charge info"
        );

        Ok(info)
    }

    /// Send one command and return the body of the charger's reply
    fn request_response(&self, command: u8) -> Result<Vec<u8>, ChargerError> {
        let rq = Self::encode_request(command);

        let h = hex::encode(&rq[..7]);
        debug!("CHARGER: TX: {h}");

        let sent = self
            .handle
            .write_interrupt(Self::ENDPOINT_OUT, &rq, Self::USB_TIMEOUT)?;
        if sent != rq.len() {
            return Err(ChargerError::ShortWrite {
                sent,
                expected: rq.len(),
            });
        }

        let mut buf = [0u8; Self::PACKET_LEN];
        let received = self
            .handle
            .read_interrupt(Self::ENDPOINT_IN, &mut buf, Self::USB_TIMEOUT)?;
        let frame = &buf[..received];

        let h = hex::encode(frame);
        debug!("CHARGER: RX: {h}");

        match Self::try_parse_msg(frame) {
            TryParseMessageResult::Ok(payload) => Self::strip_command(command, payload),
            TryParseMessageResult::Incomplete => Err(ChargerError::Incomplete(h)),
            TryParseMessageResult::Invalid(reason) => {
                Err(ChargerError::Invalid { reason, frame: h })
            }
        }
    }

    /// The reply payload echoes the command byte before the body
    fn strip_command(command: u8, mut payload: Vec<u8>) -> Result<Vec<u8>, ChargerError> {
        match payload.first() {
            Some(&actual) if actual == command => {
                payload.remove(0);
                Ok(payload)
            }
            Some(&actual) => Err(ChargerError::UnexpectedCommand {
                expected: command,
                actual,
            }),
            None => Err(ChargerError::Incomplete(String::new())),
        }
    }

    /// Build the request packet for a command.
    ///
    /// Start Byte | End Byte | Meaning
    /// 0          | 0        | The constant header 0x0f
    /// 1          | 1        | Length, always 3
    /// 2          | 2        | The command
    /// 3          | 3        | 0x00
    /// 4          | 4        | Checksum over bytes 2-3
    /// 5          | 6        | 0xff 0xff
    /// 7          | 63       | Zero padding
    fn encode_request(command: u8) -> [u8; Self::PACKET_LEN] {
        let mut rq = [0u8; Self::PACKET_LEN];
        rq[0] = Self::MSG_HEADER;
        rq[1] = 0x03;
        rq[2] = command;
        rq[3] = 0x00;
        rq[4] = Self::checksum(&rq[2..4]);
        rq[5] = 0xff;
        rq[6] = 0xff;
        rq
    }

    /// Attempt to parse the given response packet returning the payload.
    ///
    /// The message format is:
    ///
    /// Start Byte | End Byte     | Meaning
    /// 0          | 0            | The constant header 0x0f
    /// 1          | 1            | The length n of the rest of the message
    /// 2          | n            | The payload, starting with the echoed command
    /// n+1        | n+1          | Checksum over bytes 2-n
    ///
    /// Anything after the checksum is packet padding.
    fn try_parse_msg(buffer: &[u8]) -> TryParseMessageResult {
        if buffer.len() < 2 {
            return TryParseMessageResult::Incomplete;
        }

        if buffer[0] != Self::MSG_HEADER {
            return TryParseMessageResult::Invalid("Unexpected header");
        }

        let len = buffer[1] as usize;
        if len < 2 {
            return TryParseMessageResult::Invalid("Too short");
        }

        if buffer.len() < len + 2 {
            return TryParseMessageResult::Incomplete;
        }

        let payload = &buffer[2..len + 1];
        if buffer[len + 1] != Self::checksum(payload) {
            return TryParseMessageResult::Invalid("Checksum failed");
        }

        TryParseMessageResult::Ok(payload.to_vec())
    }

    /// Compute the check value for the given bytes
    fn checksum(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }
}

/// The parts of a USB handle needed to give the device back
trait InterfaceHandle {
    fn release_interface(&mut self, iface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;
}

impl InterfaceHandle for DeviceHandle<GlobalContext> {
    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, iface)
    }

    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, iface)
    }
}

/// Release the claimed interface and hand it back to the kernel driver.
///
/// The driver is reattached even if releasing fails; the first error is returned.
fn release_interface<H: InterfaceHandle>(
    handle: &mut H,
    iface: u8,
    reattach_kernel_driver: bool,
) -> Result<(), ChargerError> {
    let released = handle.release_interface(iface);
    let reattached = if reattach_kernel_driver {
        debug!("CHARGER: reattaching kernel driver");
        handle.attach_kernel_driver(iface)
    } else {
        Ok(())
    };

    Ok(released.and(reattached)?)
}

impl Charger for ChargerClient {
    async fn fetch_charge_info(&mut self) -> Result<ChargeInfo, ChargerError> {
        tokio::task::block_in_place(|| self.read_charge_info())
    }
}

impl Drop for ChargerClient {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("CHARGER: Failed to release device: {err}");
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
enum TryParseMessageResult {
    Ok(Vec<u8>),
    Incomplete,
    Invalid(&'static str),
}

#[test]
fn test_try_parse_message_happy() {
    let message = hex::decode(
        "0f1b550108980e1020d001f41c21003c0ff00fec00000000000000006cffff0000",
    )
    .unwrap();
    let payload =
        hex::decode("550108980e1020d001f41c21003c0ff00fec0000000000000000").unwrap();
    let result = ChargerClient::try_parse_msg(&message[..]);
    assert_eq!(result, TryParseMessageResult::Ok(payload));
}

#[test]
fn test_try_parse_message_no_length() {
    let message = hex::decode("0f").unwrap();
    let result = ChargerClient::try_parse_msg(&message[..]);
    assert_eq!(result, TryParseMessageResult::Incomplete);
}

#[test]
fn test_try_parse_message_bad_header() {
    let message = hex::decode("101b55").unwrap();
    let result = ChargerClient::try_parse_msg(&message[..]);
    assert_eq!(result, TryParseMessageResult::Invalid("Unexpected header"));
}

#[test]
fn test_try_parse_message_incomplete() {
    let message = hex::decode("0f1b550108980e1020d001f41c21003c0ff0").unwrap();
    let result = ChargerClient::try_parse_msg(&message[..]);
    assert_eq!(result, TryParseMessageResult::Incomplete);
}

#[test]
fn test_try_parse_message_bad_checksum() {
    let message =
        hex::decode("0f1b550108980e1020d001f41c21003c0ff00fec00000000000000006d").unwrap();
    let result = ChargerClient::try_parse_msg(&message[..]);
    assert_eq!(result, TryParseMessageResult::Invalid("Checksum failed"));
}

#[test]
fn test_encode_request() {
    let rq = ChargerClient::encode_request(0x55);
    assert_eq!(hex::encode(&rq[..7]), "0f03550055ffff");
    assert!(rq[7..].iter().all(|&b| b == 0));
}

#[test]
fn test_strip_command() {
    let body = ChargerClient::strip_command(0x57, vec![0x57, 0x01, 0x02]).unwrap();
    assert_eq!(body, vec![0x01, 0x02]);

    let result = ChargerClient::strip_command(0x57, vec![0x55, 0x01]);
    assert!(matches!(
        result,
        Err(ChargerError::UnexpectedCommand { expected: 0x57, actual: 0x55 })
    ));
}

#[test]
fn test_checksum() {
    let mut payload = vec![0x57];
    payload.extend_from_slice(b"100069");
    payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x05, 0x02]);
    assert_eq!(ChargerClient::checksum(&payload), 0x90);
}

#[cfg(test)]
#[derive(Default)]
struct FakeHandle {
    fail_release: bool,
    released: bool,
    reattached: bool,
}

#[cfg(test)]
impl InterfaceHandle for FakeHandle {
    fn release_interface(&mut self, _iface: u8) -> rusb::Result<()> {
        if self.fail_release {
            return Err(rusb::Error::NoDevice);
        }
        self.released = true;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, _iface: u8) -> rusb::Result<()> {
        self.reattached = true;
        Ok(())
    }
}

#[test]
fn test_release_reattaches_kernel_driver() {
    let mut handle = FakeHandle::default();
    release_interface(&mut handle, 0, true).unwrap();
    assert!(handle.released);
    assert!(handle.reattached);
}

#[test]
fn test_release_leaves_driver_alone_when_none_was_bound() {
    let mut handle = FakeHandle::default();
    release_interface(&mut handle, 0, false).unwrap();
    assert!(handle.released);
    assert!(!handle.reattached);
}

#[test]
fn test_release_failure_still_reattaches_kernel_driver() {
    let mut handle = FakeHandle {
        fail_release: true,
        ..Default::default()
    };
    let result = release_interface(&mut handle, 0, true);
    assert!(matches!(result, Err(ChargerError::Usb(rusb::Error::NoDevice))));
    assert!(handle.reattached);
}
