use btleplug::api::bleuuid::uuid_from_u16;
use std::time::Duration;
use uuid::Uuid;

/// UUID for the Heart Rate Service.
pub const HEARTRATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);
/// UUID for the Heart Rate Measurement Characteristic.
pub const HEARTRATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

/// Capacity of the reusable notification scratch buffer.
pub const SCRATCH_BUFFER_CAPACITY: usize = 256;

pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// How long the adapter scans before candidates are enumerated.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 64;
