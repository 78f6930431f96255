use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use futures::future;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::{sleep, Instant, Sleep};

use crate::device::bridge::EventSender;
use crate::device::catalog::DeviceCatalog;
use crate::device::decoder::decode_advertisement;
use crate::device::transport::{AdvertisementStream, Transport};
use crate::device::types::{Advertisement, Device, MonitorEvent};
use crate::error::MonitorError;

struct ScanSession {
    started_at: Instant,
    duration_budget: Duration,
    deadline: Pin<Box<Sleep>>,
    advertisements: AdvertisementStream,
}

#[derive(Debug)]
pub enum ScanProgress {
    Advertisement(Advertisement),
    /// The duration budget elapsed, or the transport ended the session.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    Cancelled,
}

/// Runs bounded discovery sessions and owns the device catalog.
pub struct ScanController<T: Transport> {
    transport: Arc<T>,
    events: EventSender,
    catalog: DeviceCatalog,
    session: Option<ScanSession>,
}

impl<T: Transport> ScanController<T> {
    pub fn new(transport: Arc<T>, events: EventSender) -> Self {
        ScanController {
            transport,
            events,
            catalog: DeviceCatalog::new(),
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /**
     * Starts a new session, clearing the catalog. Rejected with `ScanAlreadyActive` before
     * touching the transport if a session is running. A zero budget completes at once.
     */
    pub async fn start_scan(&mut self, duration_budget: Duration) -> Result<(), MonitorError> {
        if self.session.is_some() {
            return Err(MonitorError::ScanAlreadyActive);
        }

        self.catalog.clear();

        if duration_budget.is_zero() {
            info!("Scan budget is zero, completing immediately");
            self.emit_completed(ScanOutcome::Completed);
            return Ok(());
        }

        let advertisements = match self.transport.start_scan().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                let reason = err.to_string();
                self.events.emit(MonitorEvent::ScanFailed { reason: reason.clone() });
                return Err(MonitorError::TransportScanFailed { reason });
            },
        };

        info!("Scanning for {}", humantime::format_duration(duration_budget));
        self.session = Some(ScanSession {
            started_at: Instant::now(),
            duration_budget,
            deadline: Box::pin(sleep(duration_budget)),
            advertisements,
        });
        Ok(())
    }

    /// Waits for the running session to make progress. Never resolves without a session.
    pub async fn progress(&mut self) -> ScanProgress {
        let session = match self.session.as_mut() {
            Some(v) => v,
            None => return future::pending().await,
        };

        tokio::select! {
            _ = &mut session.deadline => ScanProgress::Expired,
            advertisement = session.advertisements.next() => match advertisement {
                Some(advertisement) => ScanProgress::Advertisement(advertisement),
                None => {
                    warn!("Discovery stream ended early");
                    ScanProgress::Expired
                },
            },
        }
    }

    pub async fn handle_progress(&mut self, progress: ScanProgress) {
        match progress {
            ScanProgress::Advertisement(advertisement) => self.handle_advertisement(&advertisement),
            ScanProgress::Expired => self.finish(ScanOutcome::Completed).await,
        }
    }

    fn handle_advertisement(&mut self, advertisement: &Advertisement) {
        if self.session.is_none() {
            return;
        }

        let verdict = decode_advertisement(advertisement);
        let device = self.catalog.record(advertisement);
        debug!("Advertisement from {} (hrs: {})", device, verdict.is_hrs_candidate);

        if let Some(sample) = verdict.sample {
            self.events.emit(MonitorEvent::SampleReceived(sample));
        }
    }

    /// Cancels the running session; `None` if there was nothing to cancel.
    pub async fn cancel_scan(&mut self) -> Option<ScanOutcome> {
        if self.session.is_none() {
            return None;
        }
        self.finish(ScanOutcome::Cancelled).await;
        Some(ScanOutcome::Cancelled)
    }

    async fn finish(&mut self, outcome: ScanOutcome) {
        let session = match self.session.take() {
            Some(v) => v,
            None => return,
        };
        // the discovery handle is released before the outcome is reported
        drop(session.advertisements);
        if let Err(err) = self.transport.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }

        info!(
            "Scan {:?} after {} of {}, {} device(s) found",
            outcome,
            humantime::format_duration(session.started_at.elapsed()),
            humantime::format_duration(session.duration_budget),
            self.catalog.len(),
        );
        self.emit_completed(outcome);
    }

    fn emit_completed(&self, outcome: ScanOutcome) {
        let devices: Vec<Device> = self.catalog.snapshot();
        self.events.emit(MonitorEvent::ScanCompleted {
            devices,
            cancelled: outcome == ScanOutcome::Cancelled,
        });
    }
}
