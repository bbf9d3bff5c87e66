use btleplug::api::bleuuid::uuid_from_u16;
use std::time::Duration;
use uuid::Uuid;

/// UUID for the Heart Rate Measurement Characteristic.
pub const HEARTRATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);
/// Device Information: Model Number String.
pub const MODEL_NUMBER_UUID: Uuid = uuid_from_u16(0x2A24);
/// Device Information: Firmware Revision String.
pub const FIRMWARE_REVISION_UUID: Uuid = uuid_from_u16(0x2A26);
/// Device Information: Manufacturer Name String.
pub const MANUFACTURER_NAME_UUID: Uuid = uuid_from_u16(0x2A29);
/// Battery Service: Battery Level.
pub const BATTERY_LEVEL_UUID: Uuid = uuid_from_u16(0x2A19);

/// PMD control point, used to read features and write stream settings.
pub const PMD_CONTROL_UUID: Uuid = Uuid::from_u128(0xFB005C81_02E7_F387_1CAD_8ACD2D8DF0C8);
/// PMD data characteristic carrying the measurement frames.
pub const PMD_DATA_UUID: Uuid = Uuid::from_u128(0xFB005C82_02E7_F387_1CAD_8ACD2D8DF0C8);

/// ECG sampling frequency of the H10.
pub const H10_ECG_SAMPLE_RATE: u16 = 130;
/// ECG resolution of the H10 in bits.
pub const H10_ECG_RESOLUTION: u16 = 14;

/// Interval at which the peripheral list is polled while scanning.
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Version byte leading every outbound datagram.
pub const WIRE_VERSION: u8 = 1;
/// Largest UDP payload we attempt to send.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Capacity of the internal event bus.
pub const EVENT_BUS_CAPACITY: usize = 1024;
/// How long to wait for the control point to answer a request.
pub const CONTROL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
