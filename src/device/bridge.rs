use std::pin::Pin;
use std::task::{Context, Poll};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use log::debug;

use crate::device::types::MonitorEvent;

/**
 * Creates the ordered channel that carries events from the background worker to the consumer.
 * The channel is unbounded so that neither side ever waits on the other.
 */
pub fn event_bridge() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded::<MonitorEvent>();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<MonitorEvent>,
}

impl EventSender {
    pub fn emit(&self, event: MonitorEvent) {
        if let Err(err) = self.tx.unbounded_send(event) {
            debug!("Dropping event, consumer is gone: {:?}", err.into_inner());
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: UnboundedReceiver<MonitorEvent>,
}

impl EventReceiver {
    /// Waits for the next event; `None` once the worker has stopped.
    pub async fn next_event(&mut self) -> Option<MonitorEvent> {
        self.rx.next().await
    }

    /// Takes every event that is ready without waiting, for consumers that poll on a timer.
    pub fn drain(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.rx.try_next() {
            events.push(event);
        }
        events
    }
}

impl Stream for EventReceiver {
    type Item = MonitorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}
