//! Biofeed
//!
//! Bridges a Polar H10 chest strap to the network. Heart rate, RR intervals
//! and the raw ECG (optionally accelerometer) stream are read over Bluetooth
//! Low Energy, decoded and forwarded as UDP datagrams, one per sample.

use anyhow::{Context, Result};
use btleplug::platform::Adapter;
use clap::Parser;
use components::{
    bridge::Bridge,
    capture::{read_capture, CaptureWriter},
    connector::DeviceConnector,
    pipeline::Pipeline,
    publisher::UdpPublisher,
    stats::StatsReporter,
};
use crate::core::{
    config::{BridgeConfig, Cli, Command},
    constants::{CONTROL_RESPONSE_TIMEOUT, EVENT_BUS_CAPACITY},
    error::BridgeError,
    events::BridgeEvent,
};
use env_logger::Env;
use futures::StreamExt;
use log::{info, warn};
use model::{
    pmd::{setting_name, ControlPointResponse, MeasurementType, StreamSettings},
    sample::Decoded,
};
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, watch};

use api::controller::{ConnectorApi, NotificationStream};

/// Traits at the seams between the components.
mod api {
    /// Connector and publisher operations.
    pub mod controller;
    /// Read access to connector state.
    pub mod model;
}

/// Components doing the actual work.
mod components {
    /// Retry loop tying connector and pipeline together.
    pub mod bridge;
    /// Capture files of raw notifications.
    pub mod capture;
    /// BLE connection to the sensor.
    pub mod connector;
    /// Decode, publish and report a single notification.
    pub mod pipeline;
    /// UDP datagram sink.
    pub mod publisher;
    /// Event bus counters.
    pub mod stats;
}

/// Core utilities used throughout the application.
mod core {
    /// Reconnect delays.
    pub mod backoff;
    /// Command line and configuration file.
    pub mod config;
    /// Application-wide constants.
    pub mod constants;
    /// Domain errors.
    pub mod error;
    /// Event system for inter-module communication.
    pub mod events;
    /// Custom macros for code simplification.
    pub mod macros;
}

/// Data models and payload decoders.
mod model {
    pub mod device;
    pub mod heartrate;
    pub mod pmd;
    pub mod sample;
    pub mod wire;
}

/// Main entry point of the application.
///
/// Initializes logging, parses the command line and runs the selected
/// command on a tokio runtime.
fn main() -> Result<()> {
    env_logger::Builder::from_env(
        Env::default()
            .filter_or("BIOFEED_LOG", "info")
            .write_style_or("BIOFEED_LOG_STYLE", "auto"),
    )
    .init();

    let cli = Cli::parse();
    let config = BridgeConfig::load(&cli)?;

    let rt = Runtime::new().context("unable to create runtime")?;
    rt.block_on(async move {
        match cli.command {
            Command::Scan => scan(&config).await,
            Command::Info => show_info(&config).await,
            Command::Run => run(config).await,
            Command::Replay { file, realtime } => replay(&config, &file, realtime).await,
        }
    })
}

/// Discovers the adapters and selects the configured one.
async fn open_connector(
    config: &BridgeConfig,
    event_bus: broadcast::Sender<BridgeEvent>,
) -> Result<DeviceConnector<Adapter>> {
    let mut connector =
        DeviceConnector::<Adapter>::new(event_bus, config.scan_duration(), config.min_rssi);
    if connector.discover_adapters().await? == 0 {
        return Err(BridgeError::NoAdapter.into());
    }
    let name = connector.select_adapter(config.adapter).await?;
    info!("using adapter {}: {}", config.adapter, name);
    Ok(connector)
}

async fn scan(config: &BridgeConfig) -> Result<()> {
    let (event_bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
    let connector = open_connector(config, event_bus).await?;
    info!("scanning for {} s", config.scan_timeout);
    let devices = connector.scan(config.scan_duration()).await?;
    if devices.is_empty() {
        println!("no devices found");
    }
    for device in devices {
        let marker = if config.device.matches(Some(device.name.as_str()), device.address) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, device);
    }
    Ok(())
}

async fn show_info(config: &BridgeConfig) -> Result<()> {
    let (event_bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
    let mut connector = open_connector(config, event_bus).await?;
    let result = print_device_info(&mut connector, config).await;
    connector.disconnect().await?;
    result
}

async fn print_device_info(
    connector: &mut DeviceConnector<Adapter>,
    config: &BridgeConfig,
) -> Result<()> {
    let device = connector.connect(&config.device).await?;
    println!("{}", device);
    println!("services:");
    for service in connector.services()? {
        println!("  {}", service);
    }
    let info = connector.read_device_info().await?;
    println!("{}", info);

    let Some(features) = info.features else {
        return Ok(());
    };
    let mut notifications = connector.subscribe(true).await?;
    for measurement in [MeasurementType::Ecg, MeasurementType::Acc] {
        if !features.supports(measurement) {
            continue;
        }
        connector
            .write_control(&StreamSettings::settings_query(measurement))
            .await?;
        let response =
            tokio::time::timeout(CONTROL_RESPONSE_TIMEOUT, next_control(&mut notifications))
                .await
                .with_context(|| format!("no answer to the {} settings query", measurement))?
                .ok_or(BridgeError::StreamClosed)?;
        if !response.is_success() {
            return Err(BridgeError::ControlRejected(response.status).into());
        }
        println!("{} settings:", measurement);
        for (setting, values) in &response.settings {
            println!("  {}: {:?}", setting_name(*setting), values);
        }
    }
    Ok(())
}

/// Waits for the next control point response, skipping measurement data.
async fn next_control(notifications: &mut NotificationStream) -> Option<ControlPointResponse> {
    while let Some(notification) = notifications.next().await {
        if let Ok(Decoded::Control(response)) = notification.decode() {
            return Some(response);
        }
    }
    None
}

async fn run(config: BridgeConfig) -> Result<()> {
    let (event_bus, events) = broadcast::channel(EVENT_BUS_CAPACITY);
    let stats = tokio::spawn(
        StatsReporter::new(events, Duration::from_secs(config.stats_interval)).run(),
    );

    let connector = open_connector(&config, event_bus.clone()).await?;
    let publisher =
        UdpPublisher::bind(config.target(), config.format, config.needs_broadcast()).await?;
    let capture = config
        .capture
        .as_deref()
        .map(CaptureWriter::open)
        .transpose()?;
    let pipeline = Pipeline::new(publisher, event_bus.clone(), capture);
    let mut bridge = Bridge::new(
        connector,
        pipeline,
        config.device.clone(),
        config.streams.settings(),
        config.retry.clone(),
        event_bus,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("stopping");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("could not listen for ctrl-c: {}", e);
                // keep the sender alive so the bridge is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    info!(
        "bridging {} to {} as {}",
        config.device,
        config.target(),
        config.format
    );
    let result = bridge.run(shutdown_rx).await;
    drop(bridge);
    if let Ok(stats) = stats.await {
        info!("{}", stats);
    }
    Ok(result?)
}

async fn replay(config: &BridgeConfig, file: &Path, realtime: bool) -> Result<()> {
    let notifications = read_capture(file)?;
    let (event_bus, events) = broadcast::channel(EVENT_BUS_CAPACITY);
    let stats = tokio::spawn(StatsReporter::new(events, Duration::ZERO).run());

    let publisher =
        UdpPublisher::bind(config.target(), config.format, config.needs_broadcast()).await?;
    let mut pipeline = Pipeline::new(publisher, event_bus, None);
    info!(
        "replaying {} notifications from {} to {}",
        notifications.len(),
        file.display(),
        config.target()
    );

    let mut previous = None;
    for notification in &notifications {
        if realtime {
            if let Some(previous) = previous {
                let gap: time::Duration = notification.received_at - previous;
                if gap.is_positive() {
                    tokio::time::sleep(gap.unsigned_abs()).await;
                }
            }
            previous = Some(notification.received_at);
        }
        pipeline.handle(notification).await;
    }

    drop(pipeline);
    let stats = stats.await?;
    info!("replay finished: {}", stats);
    Ok(())
}
