use std::time::Duration;
use uuid::Uuid;

/**
 * How long a discovery session runs unless a budget is given explicitly.
 */
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/**
 * How long connecting and subscribing together may take before the attempt fails.
 */
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/**
 * How often a connected peripheral is asked whether it is still connected. Not every platform
 * ends the notification stream when the link drops.
 */
pub const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/**
 * Max time to wait for the platform to report the connection status. On macOS this call can
 * hang when the peripheral has gone away.
 */
pub const IS_CONNECTED_DEADLINE: Duration = Duration::from_millis(2000);

/**
 * The UUID of the Bluetooth SIG Heart Rate Service (16-bit alias 0x180D)
 */
pub const HEART_RATE_SERVICE: &str = "0000180d-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the Heart Rate Measurement characteristic (16-bit alias 0x2A37).
 * This is the only characteristic the monitor ever touches.
 */
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC: &str = "00002a37-0000-1000-8000-00805f9b34fb";

pub const HEART_RATE_SERVICE_ALIAS: u16 = 0x180D;
pub const HEART_RATE_MEASUREMENT_ALIAS: u16 = 0x2A37;

// Bluetooth base UUID: 0000xxxx-0000-1000-8000-00805f9b34fb
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/**
 * Expands a 16-bit SIG alias into its full 128-bit form.
 */
pub const fn uuid_from_alias(alias: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((alias as u128) << 96))
}

pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_alias(HEART_RATE_SERVICE_ALIAS);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_alias(HEART_RATE_MEASUREMENT_ALIAS);

pub fn is_heart_rate_service(uuid: &Uuid) -> bool {
    *uuid == HEART_RATE_SERVICE_UUID
}
