//! Hot-plug Serial Port Monitor
//!
//! Follows one serial port through unplug/replug and prints its lifecycle
//! events.
//!
//! ```text
//! hotcom                 follow the default VID/PID device
//! hotcom <config.json>   follow the device described in a config file
//! hotcom list            list attached serial devices
//! ```

mod settings;

use std::path::PathBuf;

use anyhow::Context;
use hotcom_detect::{DeviceDirectory, SystemDirectory};
use hotcom_link::PortController;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hotcom=info,hotcom_detect=info,hotcom_link=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    match arg.as_deref() {
        Some("list") => list_devices(),
        path => monitor(path.map(PathBuf::from)).await,
    }
}

/// Print every attached serial device
fn list_devices() -> anyhow::Result<()> {
    let devices = SystemDirectory
        .devices()
        .context("failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No serial devices found");
    }
    for device in devices {
        println!(
            "{:<16} {}  [{}]",
            device.port_label().unwrap_or_default(),
            device.name,
            device.device_id
        );
    }
    Ok(())
}

/// Follow the configured port until Ctrl-C
async fn monitor(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = settings::load(config_path.as_deref())?;
    tracing::info!("Starting hotcom monitor for {:?}", config.binding);

    let controller = PortController::system(config).context("failed to start port controller")?;
    let (_id, mut events) = controller.event_stream();

    let connected = controller.try_open()?;
    println!("Connected: {}", connected);

    loop {
        tokio::select! {
            Some(event) = events.recv() => println!("{}", event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    controller.dispose();
    Ok(())
}
