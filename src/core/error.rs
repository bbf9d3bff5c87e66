//! Core Errors
//!
//! Error conditions raised by the connector, the payload decoder and the
//! publisher. Application-level plumbing wraps these in `anyhow::Error`.

use thiserror::Error;
use uuid::Uuid;

use crate::model::pmd::ControlStatus;

/// Result type used by the bridge components.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Reasons a notification payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("{field} truncated at offset {offset}")]
    Truncated { field: &'static str, offset: usize },

    #[error("sample block of {len} bytes is not a multiple of {sample_size}")]
    Misaligned { len: usize, sample_size: usize },

    #[error("unsupported measurement type 0x{0:02x}")]
    UnsupportedMeasurement(u8),

    #[error("unsupported frame type 0x{frame_type:02x} for measurement 0x{measurement:02x}")]
    UnsupportedFrame { measurement: u8, frame_type: u8 },

    #[error("unexpected response code 0x{0:02x}")]
    UnexpectedResponse(u8),

    #[error("notification from unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),
}

/// Errors raised while bridging a sensor to the network.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("no device connected")]
    NotConnected,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("peripheral has no characteristic {0}")]
    CharacteristicMissing(Uuid),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] DecodeError),

    #[error("control point rejected request: {0:?}")]
    ControlRejected(ControlStatus),

    #[error("notification stream closed")]
    StreamClosed,

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<BridgeError>,
    },

    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode datagram: {0}")]
    Encode(String),
}

impl BridgeError {
    /// Whether the condition may clear up on its own, so that a reconnect is
    /// worth attempting. A stream start refused in the current device state
    /// (e.g. no skin contact yet) counts as such.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::DeviceNotFound(_)
                | BridgeError::ConnectionRefused(_)
                | BridgeError::StreamClosed
                | BridgeError::ControlRejected(ControlStatus::InvalidState)
                | BridgeError::Ble(_)
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(value: serde_json::Error) -> Self {
        BridgeError::Encode(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::DeviceNotFound("Polar H10".into()).is_transient());
        assert!(BridgeError::ConnectionRefused("busy".into()).is_transient());
        assert!(BridgeError::StreamClosed.is_transient());
        assert!(BridgeError::ControlRejected(ControlStatus::InvalidState).is_transient());
        assert!(!BridgeError::ControlRejected(ControlStatus::InvalidSampleRate).is_transient());
        assert!(!BridgeError::NoAdapter.is_transient());
        assert!(!BridgeError::CharacteristicMissing(Uuid::nil()).is_transient());
        assert!(!BridgeError::MalformedPayload(DecodeError::TooShort {
            expected: 2,
            actual: 1
        })
        .is_transient());
    }

    #[test]
    fn test_decode_error_message() {
        let err = BridgeError::from(DecodeError::Misaligned {
            len: 7,
            sample_size: 3,
        });
        assert_eq!(
            err.to_string(),
            "malformed payload: sample block of 7 bytes is not a multiple of 3"
        );
    }
}
