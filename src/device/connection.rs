use std::sync::Arc;
use std::time::Duration;
use futures::future;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, timeout_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::bridge::EventSender;
use crate::device::constants::{HEART_RATE_MEASUREMENT_UUID, LINK_CHECK_INTERVAL};
use crate::device::decoder::decode_measurement;
use crate::device::transport::{NotificationStream, Transport};
use crate::device::types::{ConnectionState, Device, MonitorEvent, SampleOrigin};
use crate::error::{MonitorError, TransportError};

type Attempt<L> = JoinHandle<Result<Established<L>, MonitorError>>;
type AttemptResult<L> = Result<Result<Established<L>, MonitorError>, JoinError>;

pub struct Established<L> {
    link: L,
    notifications: NotificationStream,
}

enum LinkPhase<L> {
    Pending {
        cancel: CancellationToken,
        attempt: Attempt<L>,
    },
    Live {
        link: L,
        notifications: NotificationStream,
        link_check: Interval,
    },
}

struct Connection<L> {
    target: Device,
    phase: LinkPhase<L>,
}

/// Something happened on the current link, or a superseded attempt finished.
pub enum LinkActivity<L> {
    AttemptFinished(AttemptResult<L>),
    Notification(Option<Vec<u8>>),
    LinkChecked(Result<bool, TransportError>),
    RetiredFinished(AttemptResult<L>),
}

/**
 * Owns the single BLE connection and its state machine:
 * Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected, with Failed reachable
 * from Connecting and Connected. Every transition is reported as a status event.
 */
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    events: EventSender,
    connect_timeout: Duration,
    state: ConnectionState,
    last_error: Option<MonitorError>,
    connection: Option<Connection<T::Link>>,
    // superseded connect attempts, reaped by `next_activity` as they finish
    retired: FuturesUnordered<Attempt<T::Link>>,
}

async fn release_link<T: Transport>(transport: &T, link: &T::Link, subscribed: bool) {
    if subscribed {
        if let Err(err) = transport.unsubscribe(link, HEART_RATE_MEASUREMENT_UUID).await {
            warn!("Failed to unsubscribe from heart rate notifications: {}", err);
        }
    }
    if let Err(err) = transport.close(link).await {
        warn!("Failed to close link: {}", err);
    }
}

async fn establish<T: Transport>(
    transport: Arc<T>,
    address: String,
    connect_timeout: Duration,
    cancel: CancellationToken,
) -> Result<Established<T::Link>, MonitorError> {
    // one deadline for connecting and subscribing together
    let deadline = Instant::now() + connect_timeout;

    let link = match timeout_at(deadline, transport.connect(&address)).await {
        Err(_) => return Err(MonitorError::TransportConnectTimeout),
        Ok(Err(err)) => return Err(MonitorError::TransportConnectFailed { reason: err.to_string() }),
        Ok(Ok(link)) => link,
    };

    if cancel.is_cancelled() {
        warn!("Connected to {} after the attempt was abandoned, closing the link", address);
        release_link(transport.as_ref(), &link, false).await;
        return Err(MonitorError::DisconnectRaceDetected);
    }

    // only the measurement characteristic is touched, sensors tend to throttle bulk GATT reads
    let notifications = match timeout_at(deadline, transport.subscribe(&link, HEART_RATE_MEASUREMENT_UUID)).await {
        Ok(Ok(v)) => v,
        Err(_) => {
            warn!("Subscribing to {} took too long", address);
            release_link(transport.as_ref(), &link, false).await;
            return Err(MonitorError::TransportConnectTimeout);
        },
        Ok(Err(err)) => {
            release_link(transport.as_ref(), &link, false).await;
            return Err(match err {
                TransportError::MissingCharacteristic => MonitorError::CharacteristicNotFound,
                err => MonitorError::SubscribeFailed { reason: err.to_string() },
            });
        },
    };

    if cancel.is_cancelled() {
        warn!("Subscribed to {} after the attempt was abandoned, closing the link", address);
        release_link(transport.as_ref(), &link, true).await;
        return Err(MonitorError::DisconnectRaceDetected);
    }

    Ok(Established { link, notifications })
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, events: EventSender, connect_timeout: Duration) -> Self {
        ConnectionManager {
            transport,
            events,
            connect_timeout,
            state: ConnectionState::Disconnected,
            last_error: None,
            connection: None,
            retired: FuturesUnordered::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&MonitorError> {
        self.last_error.as_ref()
    }

    pub fn target(&self) -> Option<&Device> {
        self.connection.as_ref().map(|connection| &connection.target)
    }

    fn transition(&mut self, state: ConnectionState, address: Option<String>) {
        debug!("Connection state {:?} -> {:?}", self.state, state);
        self.state = state.clone();
        self.events.emit(MonitorEvent::status(state, address));
    }

    fn fail(&mut self, error: MonitorError) {
        let address = self.connection.take().map(|connection| connection.target.address);
        warn!("Connection to {:?} failed: {}", address, error);
        self.last_error = Some(error.clone());
        self.transition(ConnectionState::Failed(error), address);
    }

    /**
     * Starts connecting to `device`. Any existing connection is torn down first without
     * emitting a status event of its own; the new attempt runs in the background and is
     * finished by `handle_activity`.
     */
    pub async fn connect(&mut self, device: Device) {
        if self.connection.is_some() {
            info!("Replacing the current connection");
            self.teardown().await;
        }

        let cancel = CancellationToken::new();
        let attempt = spawn(establish(
            self.transport.clone(),
            device.address.clone(),
            self.connect_timeout,
            cancel.clone(),
        ));

        info!("Connecting to {}", device);
        let address = device.address.clone();
        self.connection = Some(Connection {
            target: device,
            phase: LinkPhase::Pending { cancel, attempt },
        });
        self.last_error = None;
        self.transition(ConnectionState::Connecting, Some(address));
    }

    /**
     * Ends the current connection. Unsubscribe and close are best-effort; the manager always
     * ends up Disconnected and always reports it, also when it already was.
     */
    pub async fn disconnect(&mut self) {
        let address = match &self.connection {
            None => {
                debug!("Disconnect requested while not connected");
                self.transition(ConnectionState::Disconnected, None);
                return;
            },
            Some(connection) => connection.target.address.clone(),
        };

        self.transition(ConnectionState::Disconnecting, Some(address.clone()));
        self.teardown().await;
        info!("Disconnected from {}", address);
        self.transition(ConnectionState::Disconnected, Some(address));
    }

    async fn teardown(&mut self) {
        let connection = match self.connection.take() {
            Some(v) => v,
            None => return,
        };

        match connection.phase {
            LinkPhase::Pending { cancel, attempt } => {
                // the attempt may already be done and waiting to be polled, reaping covers that
                cancel.cancel();
                self.retired.push(attempt);
            },
            LinkPhase::Live { link, notifications, .. } => {
                drop(notifications);
                release_link(self.transport.as_ref(), &link, true).await;
            },
        }
    }

    /**
     * Waits for the pending attempt to finish, the next notification, the periodic link check
     * or a superseded attempt to finish. Never resolves while idle.
     */
    pub async fn next_activity(&mut self) -> LinkActivity<T::Link> {
        let transport = self.transport.clone();
        let connection = &mut self.connection;
        let retired = &mut self.retired;

        let current = async {
            match connection.as_mut().map(|connection| &mut connection.phase) {
                Some(LinkPhase::Pending { attempt, .. }) => LinkActivity::AttemptFinished(attempt.await),
                Some(LinkPhase::Live { link, notifications, link_check }) => tokio::select! {
                    payload = notifications.next() => LinkActivity::Notification(payload),
                    _ = link_check.tick() => LinkActivity::LinkChecked(transport.is_connected(link).await),
                },
                None => future::pending().await,
            }
        };

        tokio::select! {
            activity = current => activity,
            Some(result) = retired.next(), if !retired.is_empty() => LinkActivity::RetiredFinished(result),
        }
    }

    pub async fn handle_activity(&mut self, activity: LinkActivity<T::Link>) {
        match activity {
            LinkActivity::AttemptFinished(Ok(Ok(established))) => self.on_established(established),
            LinkActivity::AttemptFinished(Ok(Err(err))) => self.fail(err),
            LinkActivity::AttemptFinished(Err(err)) => {
                self.fail(MonitorError::TransportConnectFailed { reason: format!("connect task failed: {}", err) })
            },
            LinkActivity::Notification(Some(payload)) => {
                if let Err(err) = self.on_notification(&payload) {
                    warn!("Dropping heart rate notification {:02X?}: {}", payload, err);
                }
            },
            LinkActivity::Notification(None) => {
                warn!("Notification stream ended");
                self.on_link_lost().await;
            },
            LinkActivity::LinkChecked(Ok(true)) => {},
            LinkActivity::LinkChecked(Ok(false)) => {
                warn!("Connection lost");
                self.on_link_lost().await;
            },
            LinkActivity::LinkChecked(Err(err)) => {
                warn!("Error checking for connection state: {}", err);
                self.on_link_lost().await;
            },
            LinkActivity::RetiredFinished(result) => self.reap(result).await,
        }
    }

    async fn on_link_lost(&mut self) {
        let link = match &self.connection {
            Some(Connection { phase: LinkPhase::Live { link, .. }, .. }) => Some(link.clone()),
            _ => None,
        };
        if let Some(link) = link {
            release_link(self.transport.as_ref(), &link, false).await;
        }
        self.fail(MonitorError::LinkLost);
    }

    async fn reap(&mut self, result: AttemptResult<T::Link>) {
        match result {
            Ok(Ok(established)) => {
                warn!("Superseded connect attempt finished before it was abandoned, closing its link");
                drop(established.notifications);
                release_link(self.transport.as_ref(), &established.link, true).await;
            },
            Ok(Err(err)) => debug!("Superseded connect attempt ended: {}", err),
            Err(err) => warn!("Failed to join connect attempt: {}", err),
        }
    }

    fn on_established(&mut self, established: Established<T::Link>) {
        let connection = match self.connection.as_mut() {
            Some(v) => v,
            None => return,
        };

        let mut link_check = interval_at(Instant::now() + LINK_CHECK_INTERVAL, LINK_CHECK_INTERVAL);
        link_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        connection.phase = LinkPhase::Live {
            link: established.link,
            notifications: established.notifications,
            link_check,
        };
        let address = connection.target.address.clone();
        info!("Peripheral {} ready, receiving heart rate notifications", address);
        self.transition(ConnectionState::Connected, Some(address));
    }

    /// Decodes one notification. A bad frame is returned as an error; the link stays up.
    pub fn on_notification(&mut self, payload: &[u8]) -> Result<(), MonitorError> {
        let address = match (&self.state, &self.connection) {
            (ConnectionState::Connected, Some(connection)) => &connection.target.address,
            _ => {
                debug!("Ignoring notification while {:?}", self.state);
                return Ok(());
            },
        };

        let sample = decode_measurement(payload, address, SampleOrigin::Notification)?;
        debug!("{} bpm from {}", sample.beats_per_minute, address);
        self.events.emit(MonitorEvent::SampleReceived(sample));
        Ok(())
    }

    /// Waits for superseded connect attempts to clean up after themselves.
    pub async fn join_retired(&mut self) {
        while let Some(result) = self.retired.next().await {
            self.reap(result).await;
        }
    }

    pub async fn shutdown(&mut self) {
        if self.connection.is_some() {
            self.disconnect().await;
        }
        self.join_retired().await;
    }
}
