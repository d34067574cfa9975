//! Status sequence plumbing shared by transport adapters
//!
//! A [`StatusFeed`] is filled from synchronous callbacks and drained as an
//! async stream by exactly one consumer. Closing the feed ends the stream
//! once buffered events have been read.

use super::StatusEvent;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

pub struct StatusFeed {
    tx: Mutex<Option<mpsc::UnboundedSender<StatusEvent>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<StatusEvent>>>,
}

impl StatusFeed {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue an event; dropped silently once the feed is closed
    pub fn push(&self, event: StatusEvent) {
        if let Ok(guard) = self.tx.lock() {
            match guard.as_ref() {
                Some(tx) => {
                    let _ = tx.send(event);
                }
                None => debug!(event = %event.kind, "Status feed closed, dropping event"),
            }
        }
    }

    /// Stop accepting events; the stream ends after draining the buffer
    pub fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Hand out the stream. Only the first call gets events.
    pub fn take_stream(&self) -> BoxStream<'static, StatusEvent> {
        let receiver = self.rx.lock().ok().and_then(|mut guard| guard.take());
        match receiver {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}
