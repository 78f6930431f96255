//! In-memory stand-in for the BLE stack, used by the tests of the scan controller,
//! connection manager and monitor worker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::future;
use futures::StreamExt;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::device::transport::{AdvertisementStream, NotificationStream, Transport};
use crate::device::types::Advertisement;
use crate::error::TransportError;

#[derive(Default)]
struct MockState {
    queued_advertisements: Vec<Advertisement>,
    advertisement_tx: Option<UnboundedSender<Advertisement>>,
    scan_error: Option<String>,
    scan_starts: usize,
    scan_stops: usize,

    held: HashMap<String, Arc<Notify>>,
    connect_errors: HashMap<String, String>,
    without_characteristic: HashSet<String>,
    subscribe_errors: HashMap<String, String>,
    stalled_subscribes: HashSet<String>,
    fail_teardown: bool,

    notification_tx: HashMap<String, UnboundedSender<Vec<u8>>>,
    connects: Vec<String>,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    closed: Vec<String>,
    open_links: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().expect("Failed to lock mock state");
        f(&mut state)
    }

    /// Delivers an advertisement to the running scan, or to the next one.
    pub fn advertise(&self, advertisement: Advertisement) {
        self.with_state(|state| {
            match &state.advertisement_tx {
                Some(tx) => { let _ = tx.unbounded_send(advertisement); },
                None => state.queued_advertisements.push(advertisement),
            }
        })
    }

    pub fn fail_scan(&self, reason: &str) {
        self.with_state(|state| state.scan_error = Some(reason.to_string()))
    }

    /// Makes `connect(address)` wait until `release(address)`.
    pub fn hold(&self, address: &str) {
        self.with_state(|state| { state.held.insert(address.to_string(), Arc::new(Notify::new())); })
    }

    pub fn release(&self, address: &str) {
        self.with_state(|state| {
            if let Some(gate) = state.held.get(address) {
                gate.notify_one();
            }
        })
    }

    pub fn fail_connect(&self, address: &str, reason: &str) {
        self.with_state(|state| { state.connect_errors.insert(address.to_string(), reason.to_string()); })
    }

    pub fn without_characteristic(&self, address: &str) {
        self.with_state(|state| { state.without_characteristic.insert(address.to_string()); })
    }

    pub fn fail_subscribe(&self, address: &str, reason: &str) {
        self.with_state(|state| { state.subscribe_errors.insert(address.to_string(), reason.to_string()); })
    }

    /// Makes `subscribe` on `address` never return.
    pub fn stall_subscribe(&self, address: &str) {
        self.with_state(|state| { state.stalled_subscribes.insert(address.to_string()); })
    }

    pub fn fail_teardown(&self) {
        self.with_state(|state| state.fail_teardown = true)
    }

    pub fn notify(&self, address: &str, payload: &[u8]) {
        self.with_state(|state| {
            if let Some(tx) = state.notification_tx.get(address) {
                let _ = tx.unbounded_send(payload.to_vec());
            }
        })
    }

    /// Ends the notification stream of `address`, as a dropped link would.
    pub fn drop_link(&self, address: &str) {
        self.with_state(|state| {
            state.notification_tx.remove(address);
            state.open_links.retain(|open| open != address);
        })
    }

    /// Drops the link of `address` without ending its notification stream.
    pub fn lose_link_silently(&self, address: &str) {
        self.with_state(|state| state.open_links.retain(|open| open != address))
    }

    pub fn scan_starts(&self) -> usize {
        self.with_state(|state| state.scan_starts)
    }

    pub fn scan_stops(&self) -> usize {
        self.with_state(|state| state.scan_stops)
    }

    pub fn connects(&self) -> Vec<String> {
        self.with_state(|state| state.connects.clone())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.with_state(|state| state.subscriptions.clone())
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.with_state(|state| state.unsubscriptions.clone())
    }

    pub fn closed(&self) -> Vec<String> {
        self.with_state(|state| state.closed.clone())
    }

    pub fn open_links(&self) -> Vec<String> {
        self.with_state(|state| state.open_links.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = String;

    async fn start_scan(&self) -> Result<AdvertisementStream, TransportError> {
        self.with_state(|state| {
            if let Some(reason) = &state.scan_error {
                return Err(TransportError::Backend { reason: reason.clone() });
            }

            let (tx, rx) = unbounded();
            for advertisement in state.queued_advertisements.drain(..) {
                let _ = tx.unbounded_send(advertisement);
            }
            state.advertisement_tx = Some(tx);
            state.scan_starts += 1;
            Ok(rx.boxed())
        })
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.with_state(|state| {
            state.advertisement_tx = None;
            state.scan_stops += 1;
        });
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<String, TransportError> {
        let gate = self.with_state(|state| {
            state.connects.push(address.to_string());
            state.held.get(address).cloned()
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.with_state(|state| {
            if let Some(reason) = state.connect_errors.get(address) {
                return Err(TransportError::Backend { reason: reason.clone() });
            }
            state.open_links.push(address.to_string());
            Ok(address.to_string())
        })
    }

    async fn subscribe(&self, link: &String, characteristic: Uuid) -> Result<NotificationStream, TransportError> {
        if self.with_state(|state| state.stalled_subscribes.contains(link)) {
            future::pending::<()>().await;
        }

        self.with_state(|state| {
            if state.without_characteristic.contains(link) {
                return Err(TransportError::MissingCharacteristic);
            }
            if let Some(reason) = state.subscribe_errors.get(link) {
                return Err(TransportError::Backend { reason: reason.clone() });
            }

            let (tx, rx) = unbounded();
            state.notification_tx.insert(link.clone(), tx);
            state.subscriptions.push(format!("{}/{}", link, characteristic));
            Ok(rx.boxed())
        })
    }

    async fn is_connected(&self, link: &String) -> Result<bool, TransportError> {
        Ok(self.with_state(|state| state.open_links.contains(link)))
    }

    async fn unsubscribe(&self, link: &String, _characteristic: Uuid) -> Result<(), TransportError> {
        self.with_state(|state| {
            state.unsubscriptions.push(link.clone());
            if state.fail_teardown {
                return Err(TransportError::Backend { reason: "unsubscribe refused".to_string() });
            }
            Ok(())
        })
    }

    async fn close(&self, link: &String) -> Result<(), TransportError> {
        self.with_state(|state| {
            state.closed.push(link.clone());
            state.open_links.retain(|open| open != link);
            state.notification_tx.remove(link);
            if state.fail_teardown {
                return Err(TransportError::Backend { reason: "link already gone".to_string() });
            }
            Ok(())
        })
    }
}
