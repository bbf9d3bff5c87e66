//! Sample Model
//!
//! Ties the raw notifications delivered by the connector to the typed
//! samples handed to the publisher.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use super::heartrate::HeartRateSample;
use super::pmd::{AccSample, ControlPointResponse, EcgSample, PmdFrame};
use crate::core::constants::{HEARTRATE_MEASUREMENT_UUID, PMD_CONTROL_UUID, PMD_DATA_UUID};
use crate::core::error::DecodeError;

/// A notification as received from the peripheral.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawNotification {
    /// Characteristic the value originates from.
    pub characteristic: Uuid,
    pub value: Vec<u8>,
    /// Arrival time on this host.
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl RawNotification {
    pub fn new(characteristic: Uuid, value: Vec<u8>) -> Self {
        Self {
            characteristic,
            value,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    /// Decodes the value according to the originating characteristic.
    pub fn decode(&self) -> Result<Decoded, DecodeError> {
        decode(self.characteristic, &self.value)
    }
}

/// A decoded sample ready to be published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sample {
    HeartRate(HeartRateSample),
    Ecg(EcgSample),
    Acc(AccSample),
}

/// Discriminant of a [`Sample`], used for counters and wire tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleKind {
    HeartRate,
    Ecg,
    Acc,
}

impl Sample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::HeartRate(_) => SampleKind::HeartRate,
            Sample::Ecg(_) => SampleKind::Ecg,
            Sample::Acc(_) => SampleKind::Acc,
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleKind::HeartRate => "heart rate",
            SampleKind::Ecg => "ECG",
            SampleKind::Acc => "ACC",
        })
    }
}

/// Outcome of decoding a notification.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// A measurement to forward.
    Sample(Sample),
    /// A control point indication, kept local.
    Control(ControlPointResponse),
}

/// Decodes a notification value based on its source characteristic.
pub fn decode(characteristic: Uuid, value: &[u8]) -> Result<Decoded, DecodeError> {
    match characteristic {
        HEARTRATE_MEASUREMENT_UUID => Ok(Decoded::Sample(Sample::HeartRate(
            HeartRateSample::parse(value)?,
        ))),
        PMD_DATA_UUID => Ok(Decoded::Sample(match PmdFrame::parse(value)? {
            PmdFrame::Ecg(ecg) => Sample::Ecg(ecg),
            PmdFrame::Acc(acc) => Sample::Acc(acc),
        })),
        PMD_CONTROL_UUID => Ok(Decoded::Control(ControlPointResponse::parse(value)?)),
        other => Err(DecodeError::UnknownCharacteristic(other)),
    }
}
