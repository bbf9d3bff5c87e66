//! This module defines the read only API of the connector state.
use crate::model::{device::DeviceDescriptor, pmd::MeasurementType};

/// `ConnectorModelApi` trait.
///
/// Read access to the state of the device connection.
pub trait ConnectorModelApi {
    /// The connected peripheral, if any.
    fn get_connected_device(&self) -> Option<DeviceDescriptor>;

    /// PMD streams started on the connected peripheral.
    fn get_active_streams(&self) -> Vec<MeasurementType>;

    fn is_connected(&self) -> bool {
        self.get_connected_device().is_some()
    }
}
