//! Polar Measurement Data Model
//!
//! This module covers the vendor specific PMD service of Polar sensors:
//! - the control point (feature read, stream settings, responses)
//! - the data characteristic frames carrying ECG and accelerometer samples
//!
//! All multi-byte fields are little-endian.

use crate::core::error::DecodeError;
use crate::{get_u16_little_endian, is_bit_set};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response code of a control point feature read.
const FEATURE_READ_RESPONSE: u8 = 0x0F;
/// Response code of a control point command.
const CONTROL_POINT_RESPONSE: u8 = 0xF0;
/// Size of the data frame header: type, timestamp, frame type.
const DATA_HEADER_LEN: usize = 10;
/// Frame type flag for delta-compressed frames.
const COMPRESSED_FRAME: u8 = 0x80;

/// Measurement types known to the PMD service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Ecg,
    Ppg,
    Acc,
    Ppi,
    Gyro,
    Magnetometer,
}

impl MeasurementType {
    pub fn code(&self) -> u8 {
        match self {
            MeasurementType::Ecg => 0x00,
            MeasurementType::Ppg => 0x01,
            MeasurementType::Acc => 0x02,
            MeasurementType::Ppi => 0x03,
            MeasurementType::Gyro => 0x05,
            MeasurementType::Magnetometer => 0x06,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(MeasurementType::Ecg),
            0x01 => Some(MeasurementType::Ppg),
            0x02 => Some(MeasurementType::Acc),
            0x03 => Some(MeasurementType::Ppi),
            0x05 => Some(MeasurementType::Gyro),
            0x06 => Some(MeasurementType::Magnetometer),
            _ => None,
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementType::Ecg => "ECG",
            MeasurementType::Ppg => "PPG",
            MeasurementType::Acc => "ACC",
            MeasurementType::Ppi => "PPI",
            MeasurementType::Gyro => "gyroscope",
            MeasurementType::Magnetometer => "magnetometer",
        };
        f.write_str(name)
    }
}

/// Measurement types the connected device can stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PmdFeatures {
    pub ecg: bool,
    pub ppg: bool,
    pub acc: bool,
    pub ppi: bool,
    pub gyro: bool,
    pub magnetometer: bool,
}

impl PmdFeatures {
    /// Parses the value read from the PMD control point.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 2 {
            return Err(DecodeError::TooShort {
                expected: 2,
                actual: data.len(),
            });
        }
        if data[0] != FEATURE_READ_RESPONSE {
            return Err(DecodeError::UnexpectedResponse(data[0]));
        }
        let bits = data[1];
        // bit 4 is reserved
        Ok(Self {
            ecg: is_bit_set!(bits, 0),
            ppg: is_bit_set!(bits, 1),
            acc: is_bit_set!(bits, 2),
            ppi: is_bit_set!(bits, 3),
            gyro: is_bit_set!(bits, 5),
            magnetometer: is_bit_set!(bits, 6),
        })
    }

    pub fn supports(&self, measurement: MeasurementType) -> bool {
        match measurement {
            MeasurementType::Ecg => self.ecg,
            MeasurementType::Ppg => self.ppg,
            MeasurementType::Acc => self.acc,
            MeasurementType::Ppi => self.ppi,
            MeasurementType::Gyro => self.gyro,
            MeasurementType::Magnetometer => self.magnetometer,
        }
    }
}

/// Stream configuration written to the control point to start a measurement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub measurement: MeasurementType,
    /// Sample rate in Hz.
    pub sample_rate: u16,
    /// Resolution in bits.
    pub resolution: u16,
    /// Range in G, accelerometer only.
    pub range: Option<u16>,
}

/// Control point op codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OpCode {
    GetSettings = 0x01,
    Start = 0x02,
    Stop = 0x03,
}

/// Setting type identifiers used in the settings TLV blocks.
const SETTING_SAMPLE_RATE: u8 = 0x00;
const SETTING_RESOLUTION: u8 = 0x01;
const SETTING_RANGE: u8 = 0x02;

impl StreamSettings {
    pub fn ecg(sample_rate: u16, resolution: u16) -> Self {
        Self {
            measurement: MeasurementType::Ecg,
            sample_rate,
            resolution,
            range: None,
        }
    }

    pub fn acc(sample_rate: u16, resolution: u16, range: u16) -> Self {
        Self {
            measurement: MeasurementType::Acc,
            sample_rate,
            resolution,
            range: Some(range),
        }
    }

    /// Command starting the stream with these settings.
    pub fn start_command(&self) -> Vec<u8> {
        let mut cmd = vec![OpCode::Start as u8, self.measurement.code()];
        push_setting(&mut cmd, SETTING_SAMPLE_RATE, self.sample_rate);
        push_setting(&mut cmd, SETTING_RESOLUTION, self.resolution);
        if let Some(range) = self.range {
            push_setting(&mut cmd, SETTING_RANGE, range);
        }
        cmd
    }

    /// Command stopping the given measurement.
    pub fn stop_command(measurement: MeasurementType) -> Vec<u8> {
        vec![OpCode::Stop as u8, measurement.code()]
    }

    /// Command requesting the settings the device offers for a measurement.
    pub fn settings_query(measurement: MeasurementType) -> Vec<u8> {
        vec![OpCode::GetSettings as u8, measurement.code()]
    }
}

/// Human readable name of a setting type in a settings response.
pub fn setting_name(setting: u8) -> &'static str {
    match setting {
        SETTING_SAMPLE_RATE => "sample rate",
        SETTING_RESOLUTION => "resolution",
        SETTING_RANGE => "range",
        0x03 => "range (mG)",
        0x04 => "channels",
        0x05 => "conversion factor",
        _ => "unknown",
    }
}

fn push_setting(cmd: &mut Vec<u8>, setting: u8, value: u16) {
    cmd.push(setting);
    cmd.push(0x01);
    cmd.extend_from_slice(&value.to_le_bytes());
}

/// Status codes returned by the control point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlStatus {
    Success,
    InvalidOpCode,
    InvalidMeasurementType,
    NotSupported,
    InvalidLength,
    InvalidParameter,
    AlreadyInState,
    InvalidResolution,
    InvalidSampleRate,
    InvalidRange,
    InvalidMtu,
    InvalidNumberOfChannels,
    InvalidState,
    DeviceInCharger,
    Unknown(u8),
}

impl From<u8> for ControlStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => ControlStatus::Success,
            1 => ControlStatus::InvalidOpCode,
            2 => ControlStatus::InvalidMeasurementType,
            3 => ControlStatus::NotSupported,
            4 => ControlStatus::InvalidLength,
            5 => ControlStatus::InvalidParameter,
            6 => ControlStatus::AlreadyInState,
            7 => ControlStatus::InvalidResolution,
            8 => ControlStatus::InvalidSampleRate,
            9 => ControlStatus::InvalidRange,
            10 => ControlStatus::InvalidMtu,
            11 => ControlStatus::InvalidNumberOfChannels,
            12 => ControlStatus::InvalidState,
            13 => ControlStatus::DeviceInCharger,
            other => ControlStatus::Unknown(other),
        }
    }
}

/// Indication sent by the control point in reply to a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPointResponse {
    pub op_code: u8,
    pub measurement: u8,
    pub status: ControlStatus,
    /// Settings offered by the device, only present for settings queries.
    pub settings: Vec<(u8, Vec<u16>)>,
}

impl ControlPointResponse {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::TooShort {
                expected: 4,
                actual: data.len(),
            });
        }
        if data[0] != CONTROL_POINT_RESPONSE {
            return Err(DecodeError::UnexpectedResponse(data[0]));
        }
        let status = ControlStatus::from(data[3]);
        let mut settings = Vec::new();
        // byte 4 flags further frames, the TLV block follows
        if status == ControlStatus::Success && data.len() > 5 {
            let mut offset = 5;
            while offset + 2 <= data.len() {
                let setting = data[offset];
                let count = data[offset + 1] as usize;
                let end = offset + 2 + count * 2;
                if end > data.len() {
                    return Err(DecodeError::Truncated {
                        field: "setting values",
                        offset,
                    });
                }
                let values = data[offset + 2..end]
                    .chunks_exact(2)
                    .map(|c| get_u16_little_endian!(c, 0))
                    .collect();
                settings.push((setting, values));
                offset = end;
            }
        }
        Ok(Self {
            op_code: data[1],
            measurement: data[2],
            status,
            settings,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ControlStatus::Success | ControlStatus::AlreadyInState
        )
    }

    /// Whether this is the reply to the start command of `measurement`.
    pub fn answers_start(&self, measurement: MeasurementType) -> bool {
        self.op_code == OpCode::Start as u8 && self.measurement == measurement.code()
    }
}

/// One ECG frame from the PMD data characteristic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EcgSample {
    /// Sensor timestamp of the last sample, in nanoseconds.
    pub sensor_timestamp: u64,
    /// Voltage readings in microvolts.
    pub samples: Vec<i32>,
}

/// One accelerometer frame from the PMD data characteristic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccSample {
    /// Sensor timestamp of the last sample, in nanoseconds.
    pub sensor_timestamp: u64,
    /// X, Y, Z readings in milli-g.
    pub samples: Vec<[i32; 3]>,
}

/// Decoded PMD data frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PmdFrame {
    Ecg(EcgSample),
    Acc(AccSample),
}

impl PmdFrame {
    /// Parses a notification from the PMD data characteristic.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < DATA_HEADER_LEN {
            return Err(DecodeError::TooShort {
                expected: DATA_HEADER_LEN,
                actual: data.len(),
            });
        }
        let measurement = data[0];
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[1..9]);
        let sensor_timestamp = u64::from_le_bytes(ts);
        let frame_type = data[9];
        let payload = &data[DATA_HEADER_LEN..];

        if frame_type & COMPRESSED_FRAME != 0 {
            return Err(DecodeError::UnsupportedFrame {
                measurement,
                frame_type,
            });
        }

        match MeasurementType::from_code(measurement) {
            Some(MeasurementType::Ecg) => {
                if frame_type != 0x00 {
                    return Err(DecodeError::UnsupportedFrame {
                        measurement,
                        frame_type,
                    });
                }
                let samples = signed_values(payload, 3)?;
                Ok(PmdFrame::Ecg(EcgSample {
                    sensor_timestamp,
                    samples,
                }))
            }
            Some(MeasurementType::Acc) => {
                let width = match frame_type {
                    0x00 => 1,
                    0x01 => 2,
                    0x02 => 3,
                    _ => {
                        return Err(DecodeError::UnsupportedFrame {
                            measurement,
                            frame_type,
                        })
                    }
                };
                if payload.len() % (width * 3) != 0 {
                    return Err(DecodeError::Misaligned {
                        len: payload.len(),
                        sample_size: width * 3,
                    });
                }
                let values = signed_values(payload, width)?;
                let samples = values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
                Ok(PmdFrame::Acc(AccSample {
                    sensor_timestamp,
                    samples,
                }))
            }
            _ => Err(DecodeError::UnsupportedMeasurement(measurement)),
        }
    }
}

/// Reads a block of little-endian signed integers `width` bytes wide.
fn signed_values(block: &[u8], width: usize) -> Result<Vec<i32>, DecodeError> {
    if block.len() % width != 0 {
        return Err(DecodeError::Misaligned {
            len: block.len(),
            sample_size: width,
        });
    }
    Ok(block
        .chunks_exact(width)
        .map(|chunk| {
            let mut raw = [0u8; 4];
            raw[..width].copy_from_slice(chunk);
            // shift up and back down to sign extend
            let shift = 32 - 8 * width as u32;
            (i32::from_le_bytes(raw) << shift) >> shift
        })
        .collect())
}
