//! Configuration
//!
//! Bridge settings are assembled from three layers: built-in defaults, an
//! optional JSON file and command line flags, later layers taking precedence.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::backoff::RetryConfig;
use super::constants::{H10_ECG_RESOLUTION, H10_ECG_SAMPLE_RATE};
use crate::model::device::DeviceSelector;
use crate::model::pmd::StreamSettings;
use crate::model::wire::WireFormat;

/// Bridge a Polar H10 heart rate sensor to UDP.
#[derive(Debug, Parser)]
#[command(name = "biofeed", version, about)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List nearby BLE peripherals.
    Scan,
    /// Connect to the sensor and print its device information.
    Info,
    /// Stream heart rate and ECG samples to the configured UDP destination.
    Run,
    /// Send the notifications of a capture file through the decoder and publisher.
    Replay {
        /// Capture file written by `run --capture`.
        file: PathBuf,
        /// Keep the recorded spacing between notifications.
        #[arg(long)]
        realtime: bool,
    },
}

/// Command line flags overriding the configuration file.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Device name prefix or Bluetooth address.
    #[arg(short, long, global = true)]
    pub device: Option<DeviceSelector>,
    /// Index of the bluetooth adapter to use.
    #[arg(long, global = true)]
    pub adapter: Option<usize>,
    /// Destination address of the datagrams.
    #[arg(long, global = true)]
    pub destination: Option<IpAddr>,
    /// Destination port of the datagrams.
    #[arg(short, long, global = true)]
    pub port: Option<u16>,
    /// Enable sending to broadcast addresses.
    #[arg(long, global = true)]
    pub broadcast: bool,
    /// Datagram encoding: binary or json.
    #[arg(long, global = true)]
    pub format: Option<WireFormat>,
    /// Do not start the ECG stream.
    #[arg(long, global = true)]
    pub no_ecg: bool,
    /// Start the accelerometer stream.
    #[arg(long, global = true)]
    pub acc: bool,
    /// Append every raw notification to this file.
    #[arg(long, global = true)]
    pub capture: Option<PathBuf>,
    /// Seconds to scan for the device.
    #[arg(long, global = true)]
    pub scan_timeout: Option<u64>,
    /// Reconnect attempts before giving up, 0 for unlimited.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,
}

/// PMD streams to request from the sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ecg: bool,
    pub ecg_sample_rate: u16,
    pub ecg_resolution: u16,
    pub acc: bool,
    pub acc_sample_rate: u16,
    pub acc_resolution: u16,
    /// Accelerometer range in G.
    pub acc_range: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ecg: true,
            ecg_sample_rate: H10_ECG_SAMPLE_RATE,
            ecg_resolution: H10_ECG_RESOLUTION,
            acc: false,
            acc_sample_rate: 200,
            acc_resolution: 16,
            acc_range: 8,
        }
    }
}

impl StreamConfig {
    /// Settings to write to the control point, in start order.
    pub fn settings(&self) -> Vec<StreamSettings> {
        let mut settings = Vec::new();
        if self.ecg {
            settings.push(StreamSettings::ecg(
                self.ecg_sample_rate,
                self.ecg_resolution,
            ));
        }
        if self.acc {
            settings.push(StreamSettings::acc(
                self.acc_sample_rate,
                self.acc_resolution,
                self.acc_range,
            ));
        }
        settings
    }
}

/// Complete bridge configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: DeviceSelector,
    pub adapter: usize,
    /// Seconds to scan for the device before giving up on an attempt.
    pub scan_timeout: u64,
    /// Weakest signal accepted when selecting by name, in dBm.
    pub min_rssi: i16,
    pub destination: IpAddr,
    pub port: u16,
    pub broadcast: bool,
    pub format: WireFormat,
    pub streams: StreamConfig,
    pub retry: RetryConfig,
    pub capture: Option<PathBuf>,
    /// Seconds between stats log lines, 0 disables them.
    pub stats_interval: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::default(),
            adapter: 0,
            scan_timeout: 5,
            min_rssi: -90,
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5005,
            broadcast: false,
            format: WireFormat::default(),
            streams: StreamConfig::default(),
            retry: RetryConfig::default(),
            capture: None,
            stats_interval: 10,
        }
    }
}

impl BridgeConfig {
    /// Reads a configuration file; fields it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Builds the effective configuration from the parsed command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(&cli.overrides);
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(device) = &overrides.device {
            self.device = device.clone();
        }
        if let Some(adapter) = overrides.adapter {
            self.adapter = adapter;
        }
        if let Some(destination) = overrides.destination {
            self.destination = destination;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if overrides.broadcast {
            self.broadcast = true;
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        if overrides.no_ecg {
            self.streams.ecg = false;
        }
        if overrides.acc {
            self.streams.acc = true;
        }
        if let Some(capture) = &overrides.capture {
            self.capture = Some(capture.clone());
        }
        if let Some(timeout) = overrides.scan_timeout {
            self.scan_timeout = timeout;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.retry.max_attempts = max_attempts;
        }
    }

    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.destination, self.port)
    }

    /// Broadcast is needed when requested or when sending to 255.255.255.255.
    pub fn needs_broadcast(&self) -> bool {
        self.broadcast
            || matches!(self.destination, IpAddr::V4(addr) if addr.is_broadcast())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_timeout)
    }
}
