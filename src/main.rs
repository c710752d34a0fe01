use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hrreader::btle::BtleplugTransport;
use hrreader::{ConsoleSink, DeviceAddress, ReportSink, SessionConfig, SessionManager};

/// Print live heart rate from a Bluetooth LE heart rate sensor.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// MAC address (or CoreBluetooth UUID) of the sensor
    address: Option<DeviceAddress>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = hrreader::logging::init_logger("info") {
        eprintln!("Could not initialize logging: {err}");
    }

    let mut sink = ConsoleSink;
    let address = match cli.address {
        Some(address) => address,
        None => {
            let address = DeviceAddress::default();
            sink.report_info(&format!("MAC address: {address}"));
            sink.report_info("Run 'hrreader <ADDRESS>' to specify a different address");
            address
        }
    };

    let config = SessionConfig::default();
    let transport = match BtleplugTransport::new(&config).await {
        Ok(transport) => transport,
        Err(err) => {
            sink.report_error(&err.to_string());
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut session = SessionManager::new(transport, sink, config);
    match session.run(&address, cancel).await {
        Ok(()) => {
            info!("Session closed");
            ExitCode::SUCCESS
        }
        // Already reported by the session.
        Err(_) => ExitCode::FAILURE,
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Can't listen for Ctrl-C: {err}");
        return;
    }
    info!("Interrupted, shutting down...");
    cancel.cancel();
}
