use std::io;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start monitor (bluetooth): {source}")]
    Transport { #[from] source: TransportError },

    #[error("Failed to start monitor (config): {source}")]
    ConfigError { #[from] source: ConfigError },
}

/// Errors raised by the BLE stack boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("The heart rate measurement characteristic is not available")]
    MissingCharacteristic,

    #[error("No peripheral with address {address} is known to the adapter")]
    UnknownDevice { address: String },

    #[error("No bluetooth adapter available")]
    NoAdapter,

    #[error("Bluetooth backend error: {reason}")]
    Backend { reason: String },
}

/// Failures while decoding a Heart Rate Measurement payload. Both are local to a single frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Heart rate payload is empty")]
    MalformedPayload,

    #[error("Heart rate payload truncated: {field} needs {needed} bytes, {available} left")]
    TruncatedPayload { field: &'static str, needed: usize, available: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("A scan is already running")]
    ScanAlreadyActive,

    #[error("Failed to start scanning: {reason}")]
    TransportScanFailed { reason: String },

    #[error("Timed out connecting to device")]
    TransportConnectTimeout,

    #[error("Failed to connect to device: {reason}")]
    TransportConnectFailed { reason: String },

    #[error("Device does not expose the heart rate measurement characteristic")]
    CharacteristicNotFound,

    #[error("Failed to subscribe to heart rate notifications: {reason}")]
    SubscribeFailed { reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Connect completed after a disconnect was requested")]
    DisconnectRaceDetected,

    #[error("Connection lost")]
    LinkLost,
}
