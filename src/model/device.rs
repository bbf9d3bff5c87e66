//! Device Model
//!
//! Descriptors for discovered peripherals and the selector used to pick the
//! sensor to bridge.

use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::pmd::PmdFeatures;

/// Represents a discovered Bluetooth device.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceDescriptor {
    /// The name of the device, if available.
    pub name: String,
    /// The unique Bluetooth address of the device.
    pub address: BDAddr,
    /// Signal strength in dBm at the time of discovery.
    pub rssi: Option<i16>,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() {
            "(unnamed)"
        } else {
            &self.name
        };
        write!(f, "{} [{}]", name, self.address)?;
        if let Some(rssi) = self.rssi {
            write!(f, " RSSI {} dBm", rssi)?;
        }
        Ok(())
    }
}

/// Identifies the peripheral to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSelector {
    /// Match the advertised local name by prefix, e.g. "Polar H10".
    Name(String),
    /// Match the Bluetooth address exactly.
    Address(BDAddr),
}

impl DeviceSelector {
    /// Checks a discovered device against the selector.
    pub fn matches(&self, name: Option<&str>, address: BDAddr) -> bool {
        match self {
            DeviceSelector::Name(prefix) => name.is_some_and(|n| n.starts_with(prefix.as_str())),
            DeviceSelector::Address(addr) => *addr == address,
        }
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Name("Polar H10".to_string())
    }
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("device selector must not be empty".to_string());
        }
        match BDAddr::from_str_delim(s) {
            Ok(addr) => Ok(DeviceSelector::Address(addr)),
            Err(_) => Ok(DeviceSelector::Name(s.to_string())),
        }
    }
}

impl TryFrom<String> for DeviceSelector {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceSelector> for String {
    fn from(value: DeviceSelector) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Name(name) => f.write_str(name),
            DeviceSelector::Address(addr) => write!(f, "{}", addr),
        }
    }
}

/// Static information read from a connected sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model_number: Option<String>,
    pub manufacturer: Option<String>,
    pub firmware_revision: Option<String>,
    /// Battery level in percent.
    pub battery_level: Option<u8>,
    pub features: Option<PmdFeatures>,
}

impl DeviceInfo {
    /// Interprets a GATT string characteristic, dropping trailing NULs.
    pub fn gatt_string(raw: &[u8]) -> String {
        String::from_utf8_lossy(raw)
            .trim_end_matches('\0')
            .trim()
            .to_string()
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = "unknown".to_string();
        writeln!(
            f,
            "Model Number: {}",
            self.model_number.as_ref().unwrap_or(&unknown)
        )?;
        writeln!(
            f,
            "Manufacturer: {}",
            self.manufacturer.as_ref().unwrap_or(&unknown)
        )?;
        writeln!(
            f,
            "Firmware: {}",
            self.firmware_revision.as_ref().unwrap_or(&unknown)
        )?;
        match self.battery_level {
            Some(level) => writeln!(f, "Battery Level: {}%", level)?,
            None => writeln!(f, "Battery Level: {}", unknown)?,
        }
        match &self.features {
            Some(features) => write!(
                f,
                "PMD features: ecg={} ppg={} acc={} ppi={} gyro={} magnetometer={}",
                features.ecg,
                features.ppg,
                features.acc,
                features.ppi,
                features.gyro,
                features.magnetometer
            ),
            None => write!(f, "PMD features: none"),
        }
    }
}
