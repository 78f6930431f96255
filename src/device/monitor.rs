use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;

use crate::config::types::Config;
use crate::device::bridge::{event_bridge, EventReceiver};
use crate::device::connection::ConnectionManager;
use crate::device::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_DURATION};
use crate::device::scan::ScanController;
use crate::device::transport::Transport;
use crate::device::types::{Device, Intent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub scan_duration: Duration,
    pub connect_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            scan_duration: DEFAULT_SCAN_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        MonitorSettings {
            scan_duration: config.scan_duration,
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Cloneable handle for issuing intents to the background worker. Never blocks.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    intents: UnboundedSender<Intent>,
}

impl MonitorHandle {
    fn send(&self, intent: Intent) {
        if let Err(err) = self.intents.unbounded_send(intent) {
            warn!("Monitor is not running, dropping {:?}", err.into_inner());
        }
    }

    pub fn scan(&self) {
        self.send(Intent::RequestScan { duration: None });
    }

    pub fn scan_for(&self, duration: Duration) {
        self.send(Intent::RequestScan { duration: Some(duration) });
    }

    pub fn cancel_scan(&self) {
        self.send(Intent::CancelScan);
    }

    pub fn connect(&self, device_id: &str) {
        self.send(Intent::RequestConnect { device_id: device_id.to_string() });
    }

    pub fn disconnect(&self) {
        self.send(Intent::RequestDisconnect);
    }

    pub fn shutdown(&self) {
        self.send(Intent::Shutdown);
    }
}

struct Monitor<T: Transport> {
    settings: MonitorSettings,
    intents: UnboundedReceiver<Intent>,
    scanner: ScanController<T>,
    connection: ConnectionManager<T>,
}

impl<T: Transport> Monitor<T> {
    async fn run(mut self) {
        info!("Monitor started");

        'mainloop: loop {
            tokio::select! {
                intent = self.intents.next() => match intent {
                    None | Some(Intent::Shutdown) => break 'mainloop,
                    Some(intent) => self.handle_intent(intent).await,
                },
                progress = self.scanner.progress() => {
                    self.scanner.handle_progress(progress).await;
                },
                activity = self.connection.next_activity() => {
                    self.connection.handle_activity(activity).await;
                },
            }
        }

        info!("Monitor stopping");
        self.scanner.cancel_scan().await;
        self.connection.shutdown().await;
        info!("Monitor stopped");
    }

    async fn handle_intent(&mut self, intent: Intent) {
        debug!("Handling {:?}", intent);

        match intent {
            Intent::RequestScan { duration } => {
                let duration = duration.unwrap_or(self.settings.scan_duration);
                if let Err(err) = self.scanner.start_scan(duration).await {
                    warn!("Scan request rejected: {}", err);
                }
            },
            Intent::CancelScan => {
                if self.scanner.cancel_scan().await.is_none() {
                    debug!("No scan to cancel");
                }
            },
            Intent::RequestConnect { device_id } => {
                let device = self.scanner.catalog()
                    .get(&device_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        info!("{} was not seen in the last scan, trying anyway", device_id);
                        Device::new(device_id)
                    });
                self.connection.connect(device).await;
            },
            Intent::RequestDisconnect => self.connection.disconnect().await,
            Intent::Shutdown => {},
        }
    }
}

/**
 * Starts the background worker that owns every transport call. Intents go in through the
 * returned handle, events come out of the receiver in the order they were produced.
 */
pub fn spawn_monitor<T: Transport>(transport: T, settings: MonitorSettings) -> (MonitorHandle, EventReceiver, JoinHandle<()>) {
    let transport = Arc::new(transport);
    let (intent_tx, intent_rx) = unbounded::<Intent>();
    let (event_tx, event_rx) = event_bridge();

    let monitor = Monitor {
        settings,
        intents: intent_rx,
        scanner: ScanController::new(transport.clone(), event_tx.clone()),
        connection: ConnectionManager::new(transport, event_tx, settings.connect_timeout),
    };

    let handle = spawn(monitor.run());
    (MonitorHandle { intents: intent_tx }, event_rx, handle)
}
