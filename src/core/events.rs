//! Core Events
//!
//! This module defines the events broadcast on the bridge's internal event
//! bus. The bridge components publish them; the stats reporter consumes them.

use std::time::Duration;

use btleplug::api::BDAddr;
use uuid::Uuid;

use crate::model::{device::DeviceDescriptor, pmd::MeasurementType, sample::SampleKind};

/// Enumeration of all bridge-level events.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    /// A peripheral has been connected.
    DeviceConnected(DeviceDescriptor),
    /// The active peripheral was disconnected.
    DeviceDisconnected(BDAddr),
    /// A PMD stream was started on the device.
    StreamStarted(MeasurementType),
    /// A sample was sent as a datagram.
    SamplePublished(SampleKind),
    /// A notification could not be decoded.
    PayloadRejected {
        characteristic: Uuid,
        reason: String,
    },
    /// A decoded sample could not be sent.
    DatagramDropped(String),
    /// The bridge will reconnect after the given delay.
    RetryScheduled { attempt: u32, delay: Duration },
}
