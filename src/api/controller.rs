//! Controller API
//!
//! This module defines the traits at the seams of the bridge: the narrow
//! BLE interface used to reach the sensor, and the sink that receives decoded
//! samples. Both are asynchronous and mockable, so the decoding, publishing
//! and retry logic can be exercised without hardware.
use crate::core::error::BridgeResult;
use crate::model::device::{DeviceDescriptor, DeviceInfo, DeviceSelector};
use crate::model::pmd::{PmdFeatures, StreamSettings};
use crate::model::sample::{RawNotification, Sample};
use anyhow::Result;
use async_trait::async_trait;
use btleplug::api::Central;
use futures::stream::Stream;
use std::net::SocketAddr;
use std::pin::Pin;
use time::OffsetDateTime;

use super::model::ConnectorModelApi;

/// Stream of notifications from the connected peripheral.
pub type NotificationStream = Pin<Box<dyn Stream<Item = RawNotification> + Send>>;

/// ConnectorApi trait
///
/// This trait extends the `ConnectorModelApi` trait with the operations the
/// bridge needs from a BLE peripheral: connect, subscribe, write the PMD
/// control point and disconnect.
#[async_trait]
pub trait ConnectorApi: ConnectorModelApi + Send + Sync {
    /// Scan for and connect to the peripheral matching `selector`.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if nothing matches before the scan times out,
    /// `ConnectionRefused` if the peripheral does not accept the connection.
    async fn connect(&mut self, selector: &DeviceSelector) -> BridgeResult<DeviceDescriptor>;

    /// Read the device information and battery characteristics.
    async fn read_device_info(&self) -> BridgeResult<DeviceInfo>;

    /// Read the PMD feature bitmap from the control point.
    async fn read_features(&self) -> BridgeResult<PmdFeatures>;

    /// Subscribe to the heart rate characteristic, and to the PMD control and
    /// data characteristics if `pmd` is set.
    ///
    /// # Returns
    ///
    /// The stream delivering all subscribed notifications in arrival order.
    async fn subscribe(&mut self, pmd: bool) -> BridgeResult<NotificationStream>;

    /// Write a raw command to the PMD control point.
    async fn write_control(&mut self, command: &[u8]) -> BridgeResult<()>;

    /// Request the given PMD streams.
    async fn start_streams(&mut self, settings: &[StreamSettings]) -> BridgeResult<()>;

    /// Stop streams, unsubscribe and disconnect.
    ///
    /// Calling this without an active connection is a no-op.
    async fn disconnect(&mut self) -> BridgeResult<()>;
}

/// PublisherApi trait
///
/// A sink for decoded samples. Implementations send every sample on its own,
/// without acknowledgement.
#[async_trait]
pub trait PublisherApi: Send {
    /// Send one sample.
    ///
    /// # Returns
    ///
    /// The number of bytes handed to the network.
    async fn publish(&mut self, received_at: OffsetDateTime, sample: &Sample) -> BridgeResult<usize>;

    /// The address the samples are sent to.
    fn target(&self) -> SocketAddr;
}

/// AdapterDiscovery trait
///
/// This trait defines the asynchronous API for discovering Bluetooth adapters in the application.
///
/// # Type Parameters
///
/// * `A` - A type that implements the `Central` trait.
///
#[async_trait]
pub trait AdapterDiscovery<A: Central> {
    /// Discover Bluetooth adapters.
    ///
    /// # Returns
    ///
    /// A `Result` containing a vector of discovered adapters of type `A` on success, or an error on failure.
    async fn discover_adapters() -> Result<Vec<A>>;
}
