use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::device::types::Advertisement;
use crate::error::TransportError;

pub type AdvertisementStream = BoxStream<'static, Advertisement>;
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/**
 * The BLE stack as seen by the monitor. All calls are made from the single background worker
 * (or from connect attempts it spawns), never from the consumer.
 */
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: Clone + Send + Sync + 'static;

    /// Opens a discovery session. The stream yields one item per received advertisement.
    async fn start_scan(&self) -> Result<AdvertisementStream, TransportError>;

    /// Releases the discovery session opened by `start_scan`.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, address: &str) -> Result<Self::Link, TransportError>;

    /// Enables notifications for `characteristic`. The stream ends when the link goes away, if
    /// the platform reports it.
    async fn subscribe(&self, link: &Self::Link, characteristic: Uuid) -> Result<NotificationStream, TransportError>;

    async fn is_connected(&self, link: &Self::Link) -> Result<bool, TransportError>;

    async fn unsubscribe(&self, link: &Self::Link, characteristic: Uuid) -> Result<(), TransportError>;

    async fn close(&self, link: &Self::Link) -> Result<(), TransportError>;
}
