//! Heart Rate Model
//!
//! Decoding of the standard Bluetooth LE Heart Rate Measurement
//! characteristic (0x2A37).

use crate::core::error::DecodeError;
use crate::{get_u16_little_endian, is_bit_set};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor contact status reported in the flags byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    /// The sensor does not report contact.
    Unsupported,
    /// Contact is supported and the strap touches the skin.
    Detected,
    /// Contact is supported but not detected.
    NotDetected,
}

/// One Heart Rate Service (HRS) notification.
///
/// Contains:
/// - Heart rate value (8 or 16 bit on the wire)
/// - Sensor contact status
/// - Energy expenditure, if present
/// - RR intervals in milliseconds, if present
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Heart rate value in beats per minute (BPM).
    pub bpm: u16,
    pub contact: SensorContact,
    /// Energy expenditure in kilojoules.
    pub energy_expended: Option<u16>,
    /// RR intervals in milliseconds, in arrival order.
    pub rr_intervals: Vec<u16>,
}

impl HeartRateSample {
    /// Parses a raw HRS message.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] if the message is shorter than its flags
    /// announce, or if the RR block has a dangling byte.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 2 {
            return Err(DecodeError::TooShort {
                expected: 2,
                actual: data.len(),
            });
        }

        let flags = data[0];
        let long_hr = is_bit_set!(flags, 0);
        let (bpm, mut offset) = if long_hr {
            if data.len() < 3 {
                return Err(DecodeError::Truncated {
                    field: "heart rate",
                    offset: 1,
                });
            }
            (get_u16_little_endian!(data, 1), 3)
        } else {
            (data[1] as u16, 2)
        };

        let contact = match (is_bit_set!(flags, 2), is_bit_set!(flags, 1)) {
            (false, _) => SensorContact::Unsupported,
            (true, true) => SensorContact::Detected,
            (true, false) => SensorContact::NotDetected,
        };

        let energy_expended = if is_bit_set!(flags, 3) {
            if data.len() < offset + 2 {
                return Err(DecodeError::Truncated {
                    field: "energy expended",
                    offset,
                });
            }
            let energy = get_u16_little_endian!(data, offset);
            offset += 2;
            Some(energy)
        } else {
            None
        };

        let mut rr_intervals = Vec::new();
        if is_bit_set!(flags, 4) {
            let block = &data[offset..];
            if block.len() % 2 != 0 {
                return Err(DecodeError::Misaligned {
                    len: block.len(),
                    sample_size: 2,
                });
            }
            // RR values are transmitted in units of 1/1024 s.
            rr_intervals = block
                .chunks_exact(2)
                .map(|chunk| (get_u16_little_endian!(chunk, 0) as f64 * 1000f64 / 1024f64) as u16)
                .collect();
        }

        Ok(Self {
            bpm,
            contact,
            energy_expended,
            rr_intervals,
        })
    }

    /// Checks if RR intervals are present.
    pub fn has_rr_interval(&self) -> bool {
        !self.rr_intervals.is_empty()
    }
}

impl fmt::Display for HeartRateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bpm", self.bpm)?;
        if self.has_rr_interval() {
            let rr = self
                .rr_intervals
                .iter()
                .map(|rr| format!("{} ms", rr))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", rr [{}]", rr)?;
        }
        if let Some(energy) = self.energy_expended {
            write!(f, ", {} kJ", energy)?;
        }
        if self.contact == SensorContact::NotDetected {
            write!(f, " (no skin contact)")?;
        }
        Ok(())
    }
}
