use indexmap::IndexMap;

use crate::device::types::{Advertisement, Device};

/// Devices seen during the current scan session, keyed by address in first-sighting order.
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    devices: IndexMap<String, Device>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Merges one sighting into the catalog. Service ids are unioned; the name is only
     * replaced by a non-empty one.
     */
    pub fn record(&mut self, advertisement: &Advertisement) -> &Device {
        let device = self.devices
            .entry(advertisement.address.clone())
            .or_insert_with(|| Device::new(advertisement.address.clone()));

        if let Some(name) = advertisement.name.as_deref().map(str::trim) {
            if !name.is_empty() {
                device.display_name = Some(name.to_string());
            }
        }

        device.advertised_service_ids.extend(advertisement.service_ids.iter().copied());
        device.advertised_service_ids.extend(advertisement.service_data.keys().copied());
        device
    }

    pub fn get(&self, address: &str) -> Option<&Device> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }
}
