use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::timeout;
use uuid::Uuid;

use crate::device::constants::IS_CONNECTED_DEADLINE;
use crate::device::transport::{AdvertisementStream, NotificationStream, Transport};
use crate::device::types::Advertisement;
use crate::error::TransportError;

/// `Transport` backed by the platform bluetooth stack through btleplug.
pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    pub async fn first_adapter() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        Ok(BtleTransport { adapter })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(peripheral);
            }
        }

        Err(TransportError::UnknownDevice { address: address.to_string() })
    }
}

async fn advertisement_from_event(adapter: &Adapter, event: CentralEvent) -> Option<Advertisement> {
    let (id, fresh_service_data) = match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => (id, None),
        CentralEvent::ServicesAdvertisement { id, .. } => (id, None),
        CentralEvent::ServiceDataAdvertisement { id, service_data } => (id, Some(service_data)),
        _ => return None,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(v) => v,
        Err(err) => {
            warn!("Could not look up advertising peripheral: {:?}", err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => {
            let mut service_data = properties.service_data;
            // the event payload can be newer than the cached properties
            if let Some(fresh) = fresh_service_data {
                service_data.extend(fresh);
            }

            Some(Advertisement {
                address: properties.address.to_string(),
                name: properties.local_name,
                service_ids: properties.services,
                service_data,
            })
        },
    }
}

#[async_trait]
impl Transport for BtleTransport {
    type Link = Peripheral;

    async fn start_scan(&self) -> Result<AdvertisementStream, TransportError> {
        let events = self.adapter.events().await?;
        // no service filter: some sensors only reveal the heart rate service in service data
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning...");

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { advertisement_from_event(&adapter, event).await }
        });

        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<Peripheral, TransportError> {
        let peripheral = self.find_peripheral(address).await?;

        info!("Connecting to peripheral {}...", address);
        peripheral.connect().await?;
        Ok(peripheral)
    }

    async fn subscribe(&self, link: &Peripheral, characteristic: Uuid) -> Result<NotificationStream, TransportError> {
        info!("Connected; Discovering services...");
        link.discover_services().await?;

        let target = link.characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::MissingCharacteristic)?;

        // open the streams before subscribing so neither the first value nor an early drop is missed
        let notifications = link.notifications().await?;
        let mut central_events = self.adapter.events().await?;

        info!("Subscribing to characteristic {:?} {:?}", target.service_uuid, target.uuid);
        link.subscribe(&target).await?;

        // the notification stream itself outlives the connection on bluez and winrt
        let peripheral_id = link.id();
        let disconnected = async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        info!("Peripheral {:?} disconnected", id);
                        return;
                    }
                }
            }
        };

        let stream = notifications
            .filter(move |data| futures::future::ready(data.uuid == characteristic))
            .map(|data| data.value)
            .take_until(disconnected);

        Ok(stream.boxed())
    }

    async fn is_connected(&self, link: &Peripheral) -> Result<bool, TransportError> {
        match timeout(IS_CONNECTED_DEADLINE, link.is_connected()).await {
            // macOS
            Err(_) => Err(TransportError::Backend { reason: "checking for connection status took too long".to_string() }),
            Ok(result) => Ok(result?),
        }
    }

    async fn unsubscribe(&self, link: &Peripheral, characteristic: Uuid) -> Result<(), TransportError> {
        let target = link.characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::MissingCharacteristic)?;

        link.unsubscribe(&target).await?;
        Ok(())
    }

    async fn close(&self, link: &Peripheral) -> Result<(), TransportError> {
        link.disconnect().await?;
        Ok(())
    }
}
