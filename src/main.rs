use std::process::ExitCode;

use accucell_mqtt::{ChargerClient, Monitor, MqttPublisher, RunState};
use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Publish live telemetry from a Turnigy Accucell 6 charger to an MQTT broker
#[derive(Parser, Debug)]
#[command(name = "accucell-mqtt")]
#[command(version)]
struct Args {
    /// MQTT broker hostname
    host: String,

    /// MQTT broker port
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_exit_status(&err));
        }
    };

    init_tracing();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Help and version requests succeed, every other argument error is a startup failure
fn usage_exit_status(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("Starting accucell-mqtt {}", env!("CARGO_PKG_VERSION"));

    let run_state = RunState::new();
    run_state
        .stop_on_signal()
        .context("Unable to install signal handlers")?;

    let publisher = MqttPublisher::connect(&args.host, args.port)
        .await
        .with_context(|| format!("Unable to connect to MQTT server {}:{}", args.host, args.port))?;

    let charger = match tokio::task::block_in_place(ChargerClient::open) {
        Ok(charger) => charger,
        Err(err) => {
            publisher.stop().await;
            return Err(err).context("Unable to connect to charger");
        }
    };

    let monitor = Monitor::new(charger, publisher, run_state);
    let (charger, publisher) = monitor.run().await;

    if let Err(err) = charger.stop() {
        error!("Failed to release charger: {err}");
    }
    publisher.stop().await;

    info!("Stopped");
    Ok(())
}

#[cfg(test)]
fn parse_error(args: &[&str]) -> clap::Error {
    Args::try_parse_from(std::iter::once("accucell-mqtt").chain(args.iter().copied()))
        .expect_err("arguments should be rejected")
}

#[test]
fn test_parses_host_and_port() {
    let args = Args::try_parse_from(["accucell-mqtt", "broker.local", "1883"]).unwrap();
    assert_eq!(args.host, "broker.local");
    assert_eq!(args.port, 1883);
}

#[test]
fn test_wrong_argument_count_fails_with_status_1() {
    let cases: [&[&str]; 3] = [&[], &["broker.local"], &["broker.local", "1883", "extra"]];
    for args in cases {
        let err = parse_error(args);
        assert_eq!(usage_exit_status(&err), 1, "{args:?}");
    }
}

#[test]
fn test_malformed_port_fails_with_status_1() {
    for port in ["abc", "70000", "1883.5"] {
        let err = parse_error(&["broker.local", port]);
        assert_eq!(err.kind(), ErrorKind::ValueValidation, "{port:?}");
        assert_eq!(usage_exit_status(&err), 1);
    }
}

#[test]
fn test_help_and_version_exit_cleanly() {
    assert_eq!(usage_exit_status(&parse_error(&["--help"])), 0);
    assert_eq!(usage_exit_status(&parse_error(&["--version"])), 0);
}
