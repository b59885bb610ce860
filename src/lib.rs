//! Publish live telemetry from a Turnigy Accucell 6 battery charger to MQTT
//!
//! Tested against the USB interface of the Accucell 6 and similar "B6" chargers, which all
//! enumerate with the same vendor and product ids.
//!
//! Every 10 seconds the charger is asked for its charge information and the reading is
//! published, one message per field:
//!
//! - `/accucell/status` - "Charging", "Not charging", or "Stopped" if the charger can't be read
//! - `/accucell/capacity` - Charged capacity (mAh)
//! - `/accucell/voltage` - Battery voltage (V)
//! - `/accucell/current` - Charge current (A)
//! - `/accucell/duration` - Charge time (s)
//! - `/accucell/int_temp` - Charger internal temperature
//!
//! # Example
//!
//! ```no_run
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let run_state = accucell_mqtt::RunState::new();
//!     run_state.stop_on_signal()?;
//!
//!     let publisher = accucell_mqtt::MqttPublisher::connect("localhost", 1883).await?;
//!     let charger = accucell_mqtt::ChargerClient::open()?;
//!
//!     let monitor = accucell_mqtt::Monitor::new(charger, publisher, run_state);
//!     let (charger, publisher) = monitor.run().await;
//!
//!     charger.stop()?;
//!     publisher.stop().await;
//! #   Ok(())
//! # }
//! ```

mod charge_info;
mod charger_client;
mod message;
mod monitor;
mod publisher;
mod run_state;
pub mod telemetry;

pub use charge_info::{ChargeInfo, ChargeState};
pub use charger_client::{Charger, ChargerClient, ChargerError};
pub use message::dev_info_message::DeviceInfo;
pub use monitor::{Monitor, PollOutcome, POLL_INTERVAL};
pub use publisher::{MqttPublisher, Publish};
pub use run_state::RunState;
