//! Wire Format
//!
//! Encoding of samples into outbound UDP datagrams. Each sample maps to
//! exactly one datagram. Two encodings are offered:
//!
//! - `binary`: compact little-endian frames
//! - `json`: one self-describing JSON object per datagram
//!
//! Binary layout:
//!
//! ```text
//! [0]     : version (1)
//! [1]     : kind (1 = heart rate, 2 = ECG, 3 = ACC)
//! [2-5]   : sequence number (u32)
//! [6-13]  : arrival time, unix milliseconds (i64)
//!
//! heart rate:
//! [14-15] : bpm (u16)
//! [16]    : flags, bit 0 contact supported, bit 1 contact detected,
//!           bit 2 energy present
//! [17-18] : energy expended (u16, kJ)
//! [19]    : rr count (u8)
//! [20..]  : rr intervals (u16, ms)
//!
//! ECG / ACC:
//! [14-21] : sensor timestamp (u64, ns)
//! [22-23] : sample count (u16)
//! [24..]  : samples (i32 µV for ECG, i32 x/y/z triples in mG for ACC)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use super::heartrate::SensorContact;
use super::sample::{Sample, SampleKind};
use crate::core::constants::{MAX_DATAGRAM_SIZE, WIRE_VERSION};
use crate::core::error::{BridgeError, BridgeResult};

/// Datagram encoding selected by configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Binary,
    Json,
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(WireFormat::Binary),
            "json" => Ok(WireFormat::Json),
            other => Err(format!("unknown wire format '{}'", other)),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WireFormat::Binary => "binary",
            WireFormat::Json => "json",
        })
    }
}

impl SampleKind {
    /// Tag identifying the sample kind in binary datagrams.
    pub fn wire_tag(&self) -> u8 {
        match self {
            SampleKind::HeartRate => 1,
            SampleKind::Ecg => 2,
            SampleKind::Acc => 3,
        }
    }
}

/// JSON representation of an outbound datagram.
#[derive(Serialize)]
struct JsonDatagram<'a> {
    version: u8,
    sequence: u32,
    received_at_ms: i64,
    sample: &'a Sample,
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Encodes a sample into a single datagram payload.
///
/// # Errors
/// Fails if the sample does not fit into one UDP datagram.
pub fn encode(
    format: WireFormat,
    sequence: u32,
    received_at: OffsetDateTime,
    sample: &Sample,
) -> BridgeResult<Vec<u8>> {
    let buf = match format {
        WireFormat::Binary => encode_binary(sequence, received_at, sample)?,
        WireFormat::Json => serde_json::to_vec(&JsonDatagram {
            version: WIRE_VERSION,
            sequence,
            received_at_ms: unix_millis(received_at),
            sample,
        })?,
    };
    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(BridgeError::Encode(format!(
            "datagram of {} bytes exceeds {} bytes",
            buf.len(),
            MAX_DATAGRAM_SIZE
        )));
    }
    Ok(buf)
}

fn encode_binary(
    sequence: u32,
    received_at: OffsetDateTime,
    sample: &Sample,
) -> BridgeResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(WIRE_VERSION);
    buf.push(sample.kind().wire_tag());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&unix_millis(received_at).to_le_bytes());

    match sample {
        Sample::HeartRate(hr) => {
            let rr_count = u8::try_from(hr.rr_intervals.len())
                .map_err(|_| BridgeError::Encode("too many rr intervals".into()))?;
            let mut flags = 0u8;
            match hr.contact {
                SensorContact::Unsupported => {}
                SensorContact::NotDetected => flags |= 0b001,
                SensorContact::Detected => flags |= 0b011,
            }
            if hr.energy_expended.is_some() {
                flags |= 0b100;
            }
            buf.extend_from_slice(&hr.bpm.to_le_bytes());
            buf.push(flags);
            buf.extend_from_slice(&hr.energy_expended.unwrap_or(0).to_le_bytes());
            buf.push(rr_count);
            for rr in &hr.rr_intervals {
                buf.extend_from_slice(&rr.to_le_bytes());
            }
        }
        Sample::Ecg(ecg) => {
            buf.extend_from_slice(&ecg.sensor_timestamp.to_le_bytes());
            buf.extend_from_slice(&sample_count(ecg.samples.len())?.to_le_bytes());
            for value in &ecg.samples {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        Sample::Acc(acc) => {
            buf.extend_from_slice(&acc.sensor_timestamp.to_le_bytes());
            buf.extend_from_slice(&sample_count(acc.samples.len())?.to_le_bytes());
            for axes in &acc.samples {
                for value in axes {
                    buf.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
    Ok(buf)
}

fn sample_count(len: usize) -> BridgeResult<u16> {
    u16::try_from(len).map_err(|_| BridgeError::Encode(format!("{} samples in one frame", len)))
}
