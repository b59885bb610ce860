//! The poll, print and publish loop.

use std::time::Duration;

use tracing::info;

use crate::charger_client::Charger;
use crate::publisher::Publish;
use crate::run_state::RunState;
use crate::telemetry::{topic, Reading, Status};

/// Time between polls, and the cool down after a failed read
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What happened during one pass of the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The charger was read and every field was published
    Published(Reading),
    /// The charger could not be read, only the stopped status was published
    ReadFailed,
}

/// Polls a charger and republishes each reading until told to stop
pub struct Monitor<C, P> {
    charger: C,
    publisher: P,
    run_state: RunState,
    interval: Duration,
}

impl<C: Charger, P: Publish> Monitor<C, P> {
    pub fn new(charger: C, publisher: P, run_state: RunState) -> Self {
        Self {
            charger,
            publisher,
            run_state,
            interval: POLL_INTERVAL,
        }
    }

    /// Poll until the run state is cleared, then hand back the charger and publisher so the
    /// caller can release them.
    pub async fn run(mut self) -> (C, P) {
        info!(interval_s = self.interval.as_secs(), "Monitoring charger");

        while self.run_state.is_running() {
            self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.run_state.stopped() => {}
            }
        }

        info!("Monitoring stopped");
        (self.charger, self.publisher)
    }

    /// Read the charger once and publish the result
    pub async fn poll_once(&mut self) -> PollOutcome {
        let timestamp = chrono::Local::now().format("%D %T").to_string();

        let info = match self.charger.fetch_charge_info().await {
            Ok(info) => info,
            Err(err) => {
                self.publisher
                    .publish(topic::STATUS, Status::Stopped.as_str())
                    .await;
                eprintln!("{timestamp} Error getting charge info: {err}");
                eprintln!(
                    "{timestamp} Waiting {} seconds...",
                    self.interval.as_secs()
                );
                return PollOutcome::ReadFailed;
            }
        };

        let reading = Reading::new(&info);

        for line in reading.console_lines(&timestamp) {
            println!("{line}");
        }

        for (topic, payload) in reading.messages() {
            self.publisher.publish(topic, payload).await;
        }

        PollOutcome::Published(reading)
    }
}

#[cfg(test)]
use crate::charge_info::{ChargeInfo, ChargeState};
#[cfg(test)]
use crate::charger_client::ChargerError;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use tokio::time::Instant;

#[cfg(test)]
fn charging_info() -> ChargeInfo {
    ChargeInfo {
        state: ChargeState::Charging,
        capacity_mah: 2200,
        voltage_mv: 8400,
        current_ma: 500,
        elapsed_s: 3600,
        temp_int: 25,
        temp_ext: 22,
        impedance_mohm: 40,
        cell_voltage_mv: vec![4200, 4200, 0, 0, 0, 0],
    }
}

/// Hands out scripted reads, then clears the run state once the script runs out
#[cfg(test)]
struct ScriptedCharger {
    reads: VecDeque<Result<ChargeInfo, ChargerError>>,
    run_state: RunState,
    calls: usize,
}

#[cfg(test)]
impl ScriptedCharger {
    fn new(
        reads: impl IntoIterator<Item = Result<ChargeInfo, ChargerError>>,
        run_state: RunState,
    ) -> Self {
        Self {
            reads: reads.into_iter().collect(),
            run_state,
            calls: 0,
        }
    }
}

#[cfg(test)]
impl Charger for ScriptedCharger {
    async fn fetch_charge_info(&mut self) -> Result<ChargeInfo, ChargerError> {
        self.calls += 1;
        let read = self
            .reads
            .pop_front()
            .unwrap_or(Err(ChargerError::Incomplete(String::new())));
        if self.reads.is_empty() {
            self.run_state.stop();
        }
        read
    }
}

#[cfg(test)]
#[derive(Default)]
struct RecordingPublisher {
    published: Vec<(Instant, String, String)>,
}

#[cfg(test)]
impl RecordingPublisher {
    fn messages(&self) -> Vec<(&str, &str)> {
        self.published
            .iter()
            .map(|(_, topic, payload)| (topic.as_str(), payload.as_str()))
            .collect()
    }
}

#[cfg(test)]
impl Publish for RecordingPublisher {
    async fn publish(&mut self, topic: &str, payload: &str) {
        self.published
            .push((Instant::now(), topic.to_string(), payload.to_string()));
    }
}

#[cfg(test)]
fn read_error() -> ChargerError {
    ChargerError::Usb(rusb::Error::Timeout)
}

#[tokio::test(start_paused = true)]
async fn test_publishes_every_field_of_a_reading() {
    let run_state = RunState::new();
    let charger = ScriptedCharger::new([Ok(charging_info())], run_state.clone());
    let monitor = Monitor::new(charger, RecordingPublisher::default(), run_state);

    let (charger, publisher) = monitor.run().await;

    assert_eq!(charger.calls, 1);
    assert_eq!(
        publisher.messages(),
        vec![
            ("/accucell/status", "Charging"),
            ("/accucell/capacity", "2200"),
            ("/accucell/voltage", "8.400"),
            ("/accucell/current", "0.5"),
            ("/accucell/duration", "3600"),
            ("/accucell/int_temp", "25"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_charger_reports_not_charging() {
    let run_state = RunState::new();
    let mut info = charging_info();
    info.state = ChargeState::Idle;
    let charger = ScriptedCharger::new([Ok(info)], run_state.clone());
    let monitor = Monitor::new(charger, RecordingPublisher::default(), run_state);

    let (_, publisher) = monitor.run().await;

    assert_eq!(publisher.messages()[0], ("/accucell/status", "Not charging"));
}

#[tokio::test(start_paused = true)]
async fn test_read_failures_only_publish_stopped() {
    let run_state = RunState::new();
    let charger = ScriptedCharger::new(
        [Err(read_error()), Err(read_error()), Err(read_error())],
        run_state.clone(),
    );
    let monitor = Monitor::new(charger, RecordingPublisher::default(), run_state);

    let (charger, publisher) = monitor.run().await;

    assert_eq!(charger.calls, 3);
    assert_eq!(
        publisher.messages(),
        vec![("/accucell/status", "Stopped"); 3]
    );
    for pair in publisher.published.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(10));
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_a_failed_read() {
    let run_state = RunState::new();
    let charger =
        ScriptedCharger::new([Err(read_error()), Ok(charging_info())], run_state.clone());
    let monitor = Monitor::new(charger, RecordingPublisher::default(), run_state);

    let (_, publisher) = monitor.run().await;

    let messages = publisher.messages();
    assert_eq!(messages.len(), 7);
    assert_eq!(messages[0], ("/accucell/status", "Stopped"));
    assert_eq!(messages[1], ("/accucell/status", "Charging"));
    assert!(publisher.published[1].0 - publisher.published[0].0 >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_sleep_ends_without_further_publishes() {
    let run_state = RunState::new();
    let charger = ScriptedCharger::new(
        [Ok(charging_info()), Ok(charging_info()), Ok(charging_info())],
        run_state.clone(),
    );
    let monitor = Monitor::new(charger, RecordingPublisher::default(), run_state.clone());

    let started = Instant::now();
    let task = tokio::spawn(monitor.run());

    tokio::time::sleep(Duration::from_secs(3)).await;
    run_state.stop();

    let (charger, publisher) = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(charger.calls, 1);
    assert_eq!(publisher.published.len(), 6);
    assert!(Instant::now() - started < POLL_INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_does_nothing_when_already_stopped() {
    let run_state = RunState::new();
    run_state.stop();
    let charger = ScriptedCharger::new([Ok(charging_info())], run_state.clone());
    let monitor = Monitor::new(charger, RecordingPublisher::default(), run_state);

    let (charger, publisher) = monitor.run().await;

    assert_eq!(charger.calls, 0);
    assert!(publisher.published.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_once_reports_outcome() {
    let run_state = RunState::new();
    let charger =
        ScriptedCharger::new([Err(read_error()), Ok(charging_info())], run_state.clone());
    let mut monitor = Monitor::new(charger, RecordingPublisher::default(), run_state);

    assert_eq!(monitor.poll_once().await, PollOutcome::ReadFailed);
    match monitor.poll_once().await {
        PollOutcome::Published(reading) => assert_eq!(reading.status, Status::Charging),
        other => panic!("unexpected outcome {other:?}"),
    }
}
