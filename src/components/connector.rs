//! Device Connector Module
//!
//! This module implements the Bluetooth Low Energy (BLE) side of the bridge.
//! It handles adapter selection, device discovery, connection management,
//! GATT subscriptions and the PMD control point of Polar sensors.
use crate::api::controller::{AdapterDiscovery, ConnectorApi, NotificationStream};
use crate::api::model::ConnectorModelApi;
use crate::core::constants::{
    BATTERY_LEVEL_UUID, FIRMWARE_REVISION_UUID, HEARTRATE_MEASUREMENT_UUID,
    MANUFACTURER_NAME_UUID, MODEL_NUMBER_UUID, PMD_CONTROL_UUID, PMD_DATA_UUID,
    SCAN_POLL_INTERVAL,
};
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::events::BridgeEvent;
use crate::model::device::{DeviceDescriptor, DeviceInfo, DeviceSelector};
use crate::model::pmd::{MeasurementType, PmdFeatures, StreamSettings};
use crate::model::sample::RawNotification;
use anyhow::Result;
use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral, ScanFilter, WriteType};
use btleplug::{
    api::{Central, Manager as _},
    platform::{Adapter, Manager},
};
use futures::StreamExt;
use log::{debug, info, trace, warn};
use std::time::Duration;
use tokio::sync::broadcast::Sender;
use tokio::time::Instant;
use uuid::Uuid;

/// State kept for the connected peripheral.
#[derive(Debug)]
struct ActiveDevice<P: Peripheral> {
    peripheral: P,
    descriptor: DeviceDescriptor,
    subscribed: Vec<Characteristic>,
    streams: Vec<MeasurementType>,
}

/// Manages the connection to a single BLE sensor.
///
/// # Type Parameters
/// - `A`: Bluetooth adapter type that implements required traits
///
/// # Fields
/// - `event_bus`: Channel for broadcasting bridge events
/// - `adapters`: Adapters found by the last discovery
/// - `selected_adapter`: Adapter used for scanning and connecting
/// - `scan_timeout`: How long to look for the device on each connect
/// - `min_rssi`: Weakest signal accepted when selecting by name
/// - `active`: The connected peripheral and its subscriptions
pub struct DeviceConnector<A: Central + AdapterDiscovery<A> + 'static> {
    event_bus: Sender<BridgeEvent>,
    adapters: Vec<A>,
    selected_adapter: Option<A>,
    scan_timeout: Duration,
    min_rssi: i16,
    active: Option<ActiveDevice<A::Peripheral>>,
}

/// Looks up a characteristic by UUID on a peripheral with discovered services.
fn find_characteristic<P: Peripheral>(peripheral: &P, uuid: Uuid) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
}

/// Reads a characteristic the device may or may not offer.
async fn read_optional<P: Peripheral>(peripheral: &P, uuid: Uuid) -> Option<Vec<u8>> {
    let characteristic = find_characteristic(peripheral, uuid)?;
    match peripheral.read(&characteristic).await {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("could not read {}: {}", uuid, e);
            None
        }
    }
}

/// Builds a descriptor from the advertised properties of a peripheral.
async fn describe<P: Peripheral>(peripheral: &P) -> BridgeResult<DeviceDescriptor> {
    let properties = peripheral.properties().await?.unwrap_or_default();
    Ok(DeviceDescriptor {
        name: properties.local_name.unwrap_or_default(),
        address: peripheral.address(),
        rssi: properties.rssi,
    })
}

impl<A: Central + AdapterDiscovery<A> + 'static> DeviceConnector<A> {
    /// Creates a new `DeviceConnector` instance.
    ///
    /// # Arguments
    /// - `event_bus`: The event bus for broadcasting bridge events.
    /// - `scan_timeout`: How long `connect` scans for the device.
    /// - `min_rssi`: Weakest signal accepted when selecting by name.
    pub fn new(event_bus: Sender<BridgeEvent>, scan_timeout: Duration, min_rssi: i16) -> Self {
        Self {
            event_bus,
            adapters: Vec::new(),
            selected_adapter: None,
            scan_timeout,
            min_rssi,
            active: None,
        }
    }

    /// Discovers the bluetooth adapters of the host.
    ///
    /// # Returns
    /// The number of adapters found.
    pub async fn discover_adapters(&mut self) -> Result<usize> {
        self.adapters = A::discover_adapters().await?;
        Ok(self.adapters.len())
    }

    /// Selects the adapter at `index` for all further operations.
    ///
    /// # Returns
    /// The adapter's display name.
    pub async fn select_adapter(&mut self, index: usize) -> BridgeResult<String> {
        let adapter = self.adapters.get(index).ok_or(BridgeError::NoAdapter)?;
        let name = adapter.adapter_info().await?;
        trace!("Selected adapter {}: {}.", index, name);
        self.selected_adapter = Some(adapter.clone());
        Ok(name)
    }

    fn adapter(&self) -> BridgeResult<&A> {
        self.selected_adapter.as_ref().ok_or(BridgeError::NoAdapter)
    }

    fn active(&self) -> BridgeResult<&ActiveDevice<A::Peripheral>> {
        self.active.as_ref().ok_or(BridgeError::NotConnected)
    }

    /// UUIDs of the GATT services discovered on the connected peripheral.
    pub fn services(&self) -> BridgeResult<Vec<Uuid>> {
        let peripheral = &self.active()?.peripheral;
        Ok(peripheral.services().into_iter().map(|s| s.uuid).collect())
    }

    /// Scans for `timeout` and lists everything seen, strongest signal first.
    pub async fn scan(&self, timeout: Duration) -> BridgeResult<Vec<DeviceDescriptor>> {
        let adapter = self.adapter()?;
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;
        let peripherals = adapter.peripherals().await;
        adapter.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in &peripherals? {
            match describe(peripheral).await {
                Ok(desc) => devices.push(desc),
                Err(e) => debug!("skipping {}: {}", peripheral.address(), e),
            }
        }
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.cmp(b)));
        Ok(devices)
    }

    /// Scans until a peripheral matches `selector` or the scan times out.
    /// The scan is stopped on every exit path.
    async fn find_peripheral(
        &self,
        selector: &DeviceSelector,
    ) -> BridgeResult<(A::Peripheral, DeviceDescriptor)> {
        let adapter = self.adapter()?;
        adapter.start_scan(ScanFilter::default()).await?;
        let found = self.poll_peripherals(adapter, selector).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!("could not stop scan: {}", e);
        }
        found?.ok_or_else(|| BridgeError::DeviceNotFound(selector.to_string()))
    }

    /// Polls the peripheral list of a scanning adapter. Among several name
    /// matches the strongest signal wins; peripherals whose properties cannot
    /// be read are skipped.
    async fn poll_peripherals(
        &self,
        adapter: &A,
        selector: &DeviceSelector,
    ) -> BridgeResult<Option<(A::Peripheral, DeviceDescriptor)>> {
        let deadline = Instant::now() + self.scan_timeout;
        loop {
            let mut candidates = Vec::new();
            for peripheral in adapter.peripherals().await? {
                let desc = match describe(&peripheral).await {
                    Ok(desc) => desc,
                    Err(e) => {
                        debug!("skipping {}: {}", peripheral.address(), e);
                        continue;
                    }
                };
                if !selector.matches(Some(desc.name.as_str()), desc.address) {
                    continue;
                }
                let strong_enough = match selector {
                    DeviceSelector::Address(_) => true,
                    DeviceSelector::Name(_) => desc.rssi.map_or(true, |r| r >= self.min_rssi),
                };
                if strong_enough {
                    candidates.push((peripheral, desc));
                } else {
                    trace!("ignoring {}: signal too weak", desc);
                }
            }
            if let Some(best) = candidates
                .into_iter()
                .max_by_key(|(_, desc)| desc.rssi.unwrap_or(i16::MIN))
            {
                return Ok(Some(best));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl<A: Central + AdapterDiscovery<A> + 'static> ConnectorApi for DeviceConnector<A> {
    async fn connect(&mut self, selector: &DeviceSelector) -> BridgeResult<DeviceDescriptor> {
        if self.active.is_some() {
            self.disconnect().await?;
        }
        let (peripheral, descriptor) = self.find_peripheral(selector).await?;
        debug!("connecting to {}", descriptor);
        peripheral
            .connect()
            .await
            .map_err(|e| BridgeError::ConnectionRefused(e.to_string()))?;
        if let Err(e) = peripheral.discover_services().await {
            if let Err(e) = peripheral.disconnect().await {
                debug!("disconnect after failed discovery: {}", e);
            }
            return Err(e.into());
        }
        info!("connected to {}", descriptor);
        self.active = Some(ActiveDevice {
            peripheral,
            descriptor: descriptor.clone(),
            subscribed: Vec::new(),
            streams: Vec::new(),
        });
        let _ = self
            .event_bus
            .send(BridgeEvent::DeviceConnected(descriptor.clone()));
        Ok(descriptor)
    }

    async fn read_device_info(&self) -> BridgeResult<DeviceInfo> {
        let peripheral = &self.active()?.peripheral;
        let text = |raw: Option<Vec<u8>>| raw.map(|r| DeviceInfo::gatt_string(&r));
        Ok(DeviceInfo {
            model_number: text(read_optional(peripheral, MODEL_NUMBER_UUID).await),
            manufacturer: text(read_optional(peripheral, MANUFACTURER_NAME_UUID).await),
            firmware_revision: text(read_optional(peripheral, FIRMWARE_REVISION_UUID).await),
            battery_level: read_optional(peripheral, BATTERY_LEVEL_UUID)
                .await
                .and_then(|raw| raw.first().copied()),
            features: read_optional(peripheral, PMD_CONTROL_UUID)
                .await
                .and_then(|raw| PmdFeatures::parse(&raw).ok()),
        })
    }

    async fn read_features(&self) -> BridgeResult<PmdFeatures> {
        let peripheral = &self.active()?.peripheral;
        let control = find_characteristic(peripheral, PMD_CONTROL_UUID)
            .ok_or(BridgeError::CharacteristicMissing(PMD_CONTROL_UUID))?;
        let raw = peripheral.read(&control).await?;
        Ok(PmdFeatures::parse(&raw)?)
    }

    async fn subscribe(&mut self, pmd: bool) -> BridgeResult<NotificationStream> {
        let active = self.active.as_mut().ok_or(BridgeError::NotConnected)?;
        // taken before subscribing so that no early indication is missed
        let notifications = active.peripheral.notifications().await?;

        let mut wanted = vec![HEARTRATE_MEASUREMENT_UUID];
        if pmd {
            wanted.extend([PMD_CONTROL_UUID, PMD_DATA_UUID]);
        }
        for uuid in wanted {
            let characteristic = find_characteristic(&active.peripheral, uuid)
                .ok_or(BridgeError::CharacteristicMissing(uuid))?;
            if active.subscribed.contains(&characteristic) {
                continue;
            }
            active.peripheral.subscribe(&characteristic).await?;
            trace!("subscribed to {}", uuid);
            active.subscribed.push(characteristic);
        }

        Ok(Box::pin(notifications.map(|notification| {
            RawNotification::new(notification.uuid, notification.value)
        })))
    }

    async fn write_control(&mut self, command: &[u8]) -> BridgeResult<()> {
        let peripheral = &self.active()?.peripheral;
        let control = find_characteristic(peripheral, PMD_CONTROL_UUID)
            .ok_or(BridgeError::CharacteristicMissing(PMD_CONTROL_UUID))?;
        trace!("control point write {:02x?}", command);
        peripheral
            .write(&control, command, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn start_streams(&mut self, settings: &[StreamSettings]) -> BridgeResult<()> {
        for stream in settings {
            debug!(
                "starting {} stream at {} Hz, {} bit",
                stream.measurement, stream.sample_rate, stream.resolution
            );
            self.write_control(&stream.start_command()).await?;
            if let Some(active) = self.active.as_mut() {
                if !active.streams.contains(&stream.measurement) {
                    active.streams.push(stream.measurement);
                }
            }
            let _ = self
                .event_bus
                .send(BridgeEvent::StreamStarted(stream.measurement));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> BridgeResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let ActiveDevice {
            peripheral,
            descriptor,
            subscribed,
            streams,
        } = active;

        if let Some(control) = find_characteristic(&peripheral, PMD_CONTROL_UUID) {
            for measurement in streams {
                let stop = StreamSettings::stop_command(measurement);
                if let Err(e) = peripheral
                    .write(&control, &stop, WriteType::WithResponse)
                    .await
                {
                    debug!("could not stop {} stream: {}", measurement, e);
                }
            }
        }
        for characteristic in &subscribed {
            if let Err(e) = peripheral.unsubscribe(characteristic).await {
                debug!("could not unsubscribe from {}: {}", characteristic.uuid, e);
            }
        }
        if !matches!(peripheral.is_connected().await, Ok(false)) {
            if let Err(e) = peripheral.disconnect().await {
                warn!("could not disconnect from {}: {}", descriptor, e);
            }
        }
        info!("disconnected from {}", descriptor);
        let _ = self
            .event_bus
            .send(BridgeEvent::DeviceDisconnected(descriptor.address));
        Ok(())
    }
}

impl<A: Central + AdapterDiscovery<A> + 'static> ConnectorModelApi for DeviceConnector<A> {
    fn get_connected_device(&self) -> Option<DeviceDescriptor> {
        self.active.as_ref().map(|active| active.descriptor.clone())
    }

    fn get_active_streams(&self) -> Vec<MeasurementType> {
        self.active
            .as_ref()
            .map(|active| active.streams.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AdapterDiscovery<Adapter> for Adapter {
    async fn discover_adapters() -> Result<Vec<Adapter>> {
        let manager = Manager::new().await?;
        Ok(manager.adapters().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::{
        api::{
            BDAddr, CentralEvent, CentralState, Descriptor, PeripheralProperties, Service,
            ValueNotification,
        },
        platform::PeripheralId,
    };
    use futures::stream::Stream;
    use mockall::mock;

    use std::{collections::BTreeSet, pin::Pin};
    use tokio::sync::broadcast;

    mock! {
        Peripheral{}

        impl Clone for Peripheral {
            fn clone(&self) -> Self;
        }

        impl std::fmt::Debug for Peripheral {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl Peripheral for Peripheral {
            fn id(&self) -> PeripheralId;
            fn address(&self) -> BDAddr;
            async fn properties(&self) -> btleplug::Result<Option<PeripheralProperties>>;
            fn services(&self) -> BTreeSet<Service>;
            fn characteristics(&self) -> BTreeSet<Characteristic>;
            async fn is_connected(&self) -> btleplug::Result<bool>;
            async fn connect(&self) -> btleplug::Result<()>;
            async fn disconnect(&self) -> btleplug::Result<()>;
            async fn discover_services(&self) -> btleplug::Result<()>;
            async fn write(
                &self,
                characteristic: &Characteristic,
                data: &[u8],
                write_type: WriteType,
            ) -> btleplug::Result<()>;
            async fn read(&self, characteristic: &Characteristic) -> btleplug::Result<Vec<u8>>;
            async fn subscribe(&self, characteristic: &Characteristic) -> btleplug::Result<()>;
            async fn unsubscribe(&self, characteristic: &Characteristic) -> btleplug::Result<()>;
            async fn notifications(&self) -> btleplug::Result<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>>;
            async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> btleplug::Result<()>;
            async fn read_descriptor(&self, descriptor: &Descriptor) -> btleplug::Result<Vec<u8>>;
        }
    }

    mock! {
        Adapter{}
        impl Clone for Adapter {
            fn clone(&self) -> Self;
        }

        impl std::fmt::Debug for Adapter {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl AdapterDiscovery<MockAdapter> for Adapter {
            async fn discover_adapters() -> Result<Vec<MockAdapter>>;
        }

        #[async_trait]
        impl Central for Adapter {
            type Peripheral = MockPeripheral;

            async fn events(&self) -> btleplug::Result<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>>;

            async fn start_scan(&self, filter: ScanFilter) -> btleplug::Result<()>;

            async fn stop_scan(&self) -> btleplug::Result<()>;

            async fn peripherals(&self) -> btleplug::Result<Vec<MockPeripheral>>;

            async fn peripheral(&self, id: &PeripheralId) -> btleplug::Result<MockPeripheral>;

            async fn add_peripheral(&self, address: &PeripheralId) -> btleplug::Result<MockPeripheral>;

            async fn adapter_info(&self) -> btleplug::Result<String>;

            async fn adapter_state(&self) -> btleplug::Result<CentralState>;
        }
    }

    const ECG_WRITE: [u8; 10] = [0x02, 0x00, 0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0E, 0x00];

    fn characteristic(uuid: Uuid) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid: Uuid::nil(),
            descriptors: BTreeSet::new(),
            properties: Default::default(),
        }
    }

    fn h10_characteristics() -> BTreeSet<Characteristic> {
        [
            HEARTRATE_MEASUREMENT_UUID,
            PMD_CONTROL_UUID,
            PMD_DATA_UUID,
            MODEL_NUMBER_UUID,
            MANUFACTURER_NAME_UUID,
            BATTERY_LEVEL_UUID,
        ]
        .into_iter()
        .map(characteristic)
        .collect()
    }

    /// A peripheral that only answers discovery calls.
    fn advertising(name: &str, rssi: i16, last_octet: u8) -> MockPeripheral {
        let name = name.to_string();
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_address()
            .returning(move || BDAddr::from([0xD4, 0x52, 0x48, 0x88, 0xEA, last_octet]));
        peripheral.expect_properties().returning(move || {
            Ok(Some(PeripheralProperties {
                local_name: Some(name.clone()),
                rssi: Some(rssi),
                ..Default::default()
            }))
        });
        peripheral
    }

    fn connector(scan_timeout: Duration) -> DeviceConnector<MockAdapter> {
        let (tx, _rx) = broadcast::channel(16);
        DeviceConnector::<MockAdapter>::new(tx, scan_timeout, -90)
    }

    fn connected(peripheral: MockPeripheral) -> DeviceConnector<MockAdapter> {
        let mut component = connector(Duration::ZERO);
        component.active = Some(ActiveDevice {
            peripheral,
            descriptor: DeviceDescriptor {
                name: "Polar H10 1234ABCD".to_string(),
                address: BDAddr::default(),
                rssi: Some(-60),
            },
            subscribed: Vec::new(),
            streams: Vec::new(),
        });
        component
    }

    #[tokio::test]
    async fn test_new_connector() {
        let component = connector(Duration::from_secs(5));
        assert!(component.selected_adapter.is_none());
        assert!(!component.is_connected());
        assert!(component.get_active_streams().is_empty());
    }

    #[tokio::test]
    async fn test_discover_and_select_adapter() {
        let mut component = connector(Duration::ZERO);
        let _da_ctx = MockAdapter::discover_adapters_context();
        _da_ctx.expect().times(1).returning(|| {
            let mut adapter = MockAdapter::default();
            adapter
                .expect_adapter_info()
                .once()
                .returning(|| Ok("hci0".to_string()));
            adapter.expect_clone().once().returning(MockAdapter::default);
            Ok(vec![adapter])
        });
        assert_eq!(component.discover_adapters().await.unwrap(), 1);
        assert_eq!(component.select_adapter(0).await.unwrap(), "hci0");
        assert!(component.selected_adapter.is_some());
        assert!(matches!(
            component.select_adapter(1).await,
            Err(BridgeError::NoAdapter)
        ));
    }

    #[tokio::test]
    async fn test_connect_picks_strongest_match() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter.expect_peripherals().returning(|| {
            let weak = advertising("Polar H10 0000000A", -95, 0x0A);
            let other = advertising("Polar OH1 0000000B", -40, 0x0B);
            let far = advertising("Polar H10 0000000C", -80, 0x0C);
            let mut near = advertising("Polar H10 0000000D", -60, 0x0D);
            near.expect_connect().once().returning(|| Ok(()));
            near.expect_discover_services().once().returning(|| Ok(()));
            Ok(vec![weak, other, far, near])
        });
        component.selected_adapter = Some(adapter);

        let desc = component
            .connect(&DeviceSelector::default())
            .await
            .unwrap();
        assert_eq!(desc.name, "Polar H10 0000000D");
        assert_eq!(desc.rssi, Some(-60));
        assert_eq!(component.get_connected_device(), Some(desc));
    }

    #[tokio::test]
    async fn test_connect_by_address_ignores_rssi() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter.expect_peripherals().returning(|| {
            let mut weak = advertising("Polar H10 0000000A", -99, 0x04);
            weak.expect_connect().once().returning(|| Ok(()));
            weak.expect_discover_services().once().returning(|| Ok(()));
            Ok(vec![weak])
        });
        component.selected_adapter = Some(adapter);

        let selector: DeviceSelector = "D4:52:48:88:EA:04".parse().unwrap();
        assert!(component.connect(&selector).await.is_ok());
        assert!(component.is_connected());
    }

    #[tokio::test]
    async fn test_connect_device_not_found() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().once().returning(|| Ok(()));
        adapter
            .expect_peripherals()
            .returning(|| Ok(vec![advertising("Polar H10 0000000A", -99, 0x0A)]));
        component.selected_adapter = Some(adapter);

        let result = component.connect(&DeviceSelector::default()).await;
        assert!(matches!(result, Err(BridgeError::DeviceNotFound(_))));
        assert!(!component.is_connected());
    }

    /// A peripheral whose properties cannot be read.
    fn unreadable(last_octet: u8) -> MockPeripheral {
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_address()
            .returning(move || BDAddr::from([0xC0, 0x11, 0x22, 0x33, 0x44, last_octet]));
        peripheral
            .expect_properties()
            .returning(|| Err(btleplug::Error::DeviceNotFound));
        peripheral
    }

    #[tokio::test]
    async fn test_connect_skips_unreadable_peripheral() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().once().returning(|_| Ok(()));
        adapter.expect_stop_scan().once().returning(|| Ok(()));
        adapter.expect_peripherals().returning(|| {
            let mut h10 = advertising("Polar H10 0000000D", -60, 0x0D);
            h10.expect_connect().once().returning(|| Ok(()));
            h10.expect_discover_services().once().returning(|| Ok(()));
            Ok(vec![unreadable(0x01), h10])
        });
        component.selected_adapter = Some(adapter);

        let desc = component
            .connect(&DeviceSelector::default())
            .await
            .unwrap();
        assert_eq!(desc.name, "Polar H10 0000000D");
        assert!(component.is_connected());
    }

    #[tokio::test]
    async fn test_scan_stopped_when_listing_fails() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().once().returning(|_| Ok(()));
        adapter.expect_stop_scan().once().returning(|| Ok(()));
        adapter
            .expect_peripherals()
            .returning(|| Err(btleplug::Error::RuntimeError("adapter gone".into())));
        component.selected_adapter = Some(adapter);

        let result = component.connect(&DeviceSelector::default()).await;
        assert!(matches!(result, Err(BridgeError::Ble(_))));
    }

    #[tokio::test]
    async fn test_scan_skips_unreadable_peripheral() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().once().returning(|_| Ok(()));
        adapter.expect_stop_scan().once().returning(|| Ok(()));
        adapter.expect_peripherals().returning(|| {
            Ok(vec![
                unreadable(0x01),
                advertising("Polar H10 0000000B", -40, 0x0B),
            ])
        });
        component.selected_adapter = Some(adapter);

        let devices = component.scan(Duration::ZERO).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Polar H10 0000000B");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter.expect_peripherals().returning(|| {
            let mut h10 = advertising("Polar H10 0000000A", -50, 0x0A);
            h10.expect_connect()
                .returning(|| Err(btleplug::Error::NotConnected));
            Ok(vec![h10])
        });
        component.selected_adapter = Some(adapter);

        let result = component.connect(&DeviceSelector::default()).await;
        match result {
            Err(e @ BridgeError::ConnectionRefused(_)) => assert!(e.is_transient()),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_without_adapter() {
        let mut component = connector(Duration::ZERO);
        assert!(matches!(
            component.connect(&DeviceSelector::default()).await,
            Err(BridgeError::NoAdapter)
        ));
    }

    #[tokio::test]
    async fn test_scan_sorted_by_signal() {
        let mut component = connector(Duration::ZERO);
        let mut adapter = MockAdapter::default();
        adapter.expect_start_scan().once().returning(|_| Ok(()));
        adapter.expect_stop_scan().once().returning(|| Ok(()));
        adapter.expect_peripherals().returning(|| {
            Ok(vec![
                advertising("Polar H10 0000000A", -80, 0x0A),
                advertising("Polar H10 0000000B", -40, 0x0B),
            ])
        });
        component.selected_adapter = Some(adapter);

        let devices = component.scan(Duration::ZERO).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].rssi, Some(-40));
        assert_eq!(devices[1].name, "Polar H10 0000000A");
    }

    #[tokio::test]
    async fn test_subscribe_streams_notifications() {
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_characteristics()
            .returning(h10_characteristics);
        peripheral.expect_notifications().once().returning(|| {
            Ok(Box::pin(futures::stream::iter(vec![
                ValueNotification {
                    uuid: HEARTRATE_MEASUREMENT_UUID,
                    value: vec![0x00, 0x3C],
                },
                ValueNotification {
                    uuid: PMD_CONTROL_UUID,
                    value: vec![0xF0, 0x02, 0x00, 0x00, 0x00],
                },
            ])))
        });
        peripheral.expect_subscribe().times(3).returning(|_| Ok(()));

        let mut component = connected(peripheral);
        let stream = component.subscribe(true).await.unwrap();
        let received: Vec<RawNotification> = stream.collect().await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].characteristic, HEARTRATE_MEASUREMENT_UUID);
        assert_eq!(received[0].value, vec![0x00, 0x3C]);
        assert_eq!(received[1].characteristic, PMD_CONTROL_UUID);
        assert_eq!(component.active.as_ref().unwrap().subscribed.len(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_missing_pmd() {
        let mut peripheral = MockPeripheral::default();
        peripheral.expect_characteristics().returning(|| {
            [characteristic(HEARTRATE_MEASUREMENT_UUID)]
                .into_iter()
                .collect()
        });
        peripheral
            .expect_notifications()
            .returning(|| Ok(Box::pin(futures::stream::empty())));
        peripheral.expect_subscribe().once().returning(|_| Ok(()));

        let mut component = connected(peripheral);
        let result = component.subscribe(true).await;
        assert!(matches!(
            result,
            Err(BridgeError::CharacteristicMissing(uuid)) if uuid == PMD_CONTROL_UUID
        ));
    }

    #[tokio::test]
    async fn test_subscribe_not_connected() {
        let mut component = connector(Duration::ZERO);
        assert!(matches!(
            component.subscribe(false).await,
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_start_ecg_stream() {
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_characteristics()
            .returning(h10_characteristics);
        peripheral
            .expect_write()
            .withf(|c, data, write_type| {
                c.uuid == PMD_CONTROL_UUID
                    && data == ECG_WRITE
                    && matches!(write_type, WriteType::WithResponse)
            })
            .once()
            .returning(|_, _, _| Ok(()));

        let mut component = connected(peripheral);
        component
            .start_streams(&[StreamSettings::ecg(130, 14)])
            .await
            .unwrap();
        assert_eq!(component.get_active_streams(), vec![MeasurementType::Ecg]);
    }

    #[tokio::test]
    async fn test_read_device_info() {
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_characteristics()
            .returning(h10_characteristics);
        peripheral.expect_read().returning(|c| match c.uuid {
            MODEL_NUMBER_UUID => Ok(b"H10\0".to_vec()),
            MANUFACTURER_NAME_UUID => Ok(b"Polar Electro Oy\0".to_vec()),
            BATTERY_LEVEL_UUID => Ok(vec![87]),
            PMD_CONTROL_UUID => Ok(vec![0x0F, 0x05, 0x00]),
            _ => Err(btleplug::Error::NotSupported("read".to_string())),
        });

        let component = connected(peripheral);
        let info = component.read_device_info().await.unwrap();
        assert_eq!(info.model_number.as_deref(), Some("H10"));
        assert_eq!(info.manufacturer.as_deref(), Some("Polar Electro Oy"));
        assert_eq!(info.firmware_revision, None);
        assert_eq!(info.battery_level, Some(87));
        let features = info.features.unwrap();
        assert!(features.ecg && features.acc && !features.ppg);

        let features = component.read_features().await.unwrap();
        assert!(features.supports(MeasurementType::Ecg));
    }

    #[tokio::test]
    async fn test_services_listed() {
        let heart_rate = btleplug::api::bleuuid::uuid_from_u16(0x180D);
        let pmd = Uuid::parse_str("fb005c80-02e7-f387-1cad-8acd2d8df0c8").unwrap();
        let mut peripheral = MockPeripheral::default();
        peripheral.expect_services().returning(move || {
            [heart_rate, pmd]
                .into_iter()
                .map(|uuid| Service {
                    uuid,
                    primary: true,
                    characteristics: BTreeSet::new(),
                })
                .collect()
        });

        let component = connected(peripheral);
        let services = component.services().unwrap();
        assert_eq!(services.len(), 2);
        assert!(services.contains(&heart_rate));
        assert!(services.contains(&pmd));

        assert!(matches!(
            connector(Duration::ZERO).services(),
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_characteristics()
            .returning(h10_characteristics);
        peripheral
            .expect_write()
            .withf(|_, data, _| data == [0x03, 0x00])
            .once()
            .returning(|_, _, _| Ok(()));
        peripheral.expect_unsubscribe().once().returning(|_| Ok(()));
        peripheral.expect_is_connected().once().returning(|| Ok(true));
        peripheral.expect_disconnect().once().returning(|| Ok(()));

        let mut component = connected(peripheral);
        if let Some(active) = component.active.as_mut() {
            active.streams.push(MeasurementType::Ecg);
            active
                .subscribed
                .push(characteristic(HEARTRATE_MEASUREMENT_UUID));
        }

        assert!(component.disconnect().await.is_ok());
        assert!(!component.is_connected());
        assert!(component.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_tolerates_failures() {
        let mut peripheral = MockPeripheral::default();
        peripheral
            .expect_characteristics()
            .returning(h10_characteristics);
        peripheral
            .expect_unsubscribe()
            .returning(|_| Err(btleplug::Error::NotConnected));
        peripheral
            .expect_is_connected()
            .returning(|| Err(btleplug::Error::NotConnected));
        peripheral
            .expect_disconnect()
            .returning(|| Err(btleplug::Error::NotConnected));

        let mut component = connected(peripheral);
        if let Some(active) = component.active.as_mut() {
            active
                .subscribed
                .push(characteristic(HEARTRATE_MEASUREMENT_UUID));
        }
        assert!(component.disconnect().await.is_ok());
        assert!(!component.is_connected());
    }
}
