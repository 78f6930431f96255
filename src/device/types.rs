use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::device::constants::is_heart_rate_service;
use crate::error::MonitorError;

/// One received advertisement, as handed over by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub service_ids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: String,
    pub display_name: Option<String>,
    // every service id seen in an advertisement, including service data keys
    pub advertised_service_ids: BTreeSet<Uuid>,
}

impl Device {
    pub fn new(address: impl Into<String>) -> Self {
        Device {
            address: address.into(),
            display_name: None,
            advertised_service_ids: BTreeSet::new(),
        }
    }

    pub fn is_hrs_candidate(&self) -> bool {
        self.advertised_service_ids.iter().any(is_heart_rate_service)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.display_name.as_deref().unwrap_or("Unknown device");
        let tag = if self.is_hrs_candidate() { " [HRS]" } else { "" };
        write!(f, "{} ({}){}", name, self.address, tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorContact {
    NotSupported,
    NoContact,
    Contact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    Advertisement,
    Notification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateSample {
    pub beats_per_minute: u16,
    pub sensor_contact: SensorContact,
    pub energy_expended_joules: Option<u16>,
    /// Each entry counts 1/1024 second units.
    pub rr_intervals: Option<Vec<u16>>,
    pub source_address: String,
    pub origin: SampleOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed(MonitorError),
}

impl ConnectionState {
    /// Disconnected and Failed both accept a new connect intent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed(_))
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn status_text(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting…".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Disconnecting => "Disconnecting…".to_string(),
            ConnectionState::Failed(reason) => format!("Connection failed: {}", reason),
        }
    }
}

/// Outbound events, delivered in production order through the event bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    StatusChanged {
        text: String,
        is_healthy_connection: bool,
        state: ConnectionState,
        address: Option<String>,
    },
    SampleReceived(HeartRateSample),
    ScanCompleted {
        devices: Vec<Device>,
        cancelled: bool,
    },
    ScanFailed {
        reason: String,
    },
}

impl MonitorEvent {
    pub fn status(state: ConnectionState, address: Option<String>) -> Self {
        MonitorEvent::StatusChanged {
            text: state.status_text(),
            is_healthy_connection: state.is_healthy(),
            state,
            address,
        }
    }
}

/// Inbound user intents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RequestScan { duration: Option<Duration> },
    CancelScan,
    RequestConnect { device_id: String },
    RequestDisconnect,
    Shutdown,
}
