//! Pure event translation and reconnect pacing for the NATS adapter
//!
//! `async-nats` reports `Connected` for the initial connection as well as for
//! every re-established link, and has no dedicated "reconnecting" event. The
//! [`LinkTracker`] turns that into the disconnect / reconnecting / reconnect
//! sequence the status monitor expects.

use crate::transport::{StatusEvent, StatusKind};
use async_nats::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Delay schedule between reconnect attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    /// Per-attempt delays in milliseconds (attempt 1 uses index 0)
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![0, 250, 500, 1000, 2000],
            sustained_delay: 4000,
        }
    }
}

impl ReconnectBackoff {
    /// Delay in milliseconds before the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: usize) -> u64 {
        let index = attempt.saturating_sub(1);
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.calculate_backoff_delay(attempt))
    }
}

/// Tracks whether the link is down so `Connected` can be told apart from a reconnect
#[derive(Debug)]
pub struct LinkTracker {
    servers: String,
    link_down: AtomicBool,
}

impl LinkTracker {
    pub fn new<S: Into<String>>(servers: S) -> Self {
        Self {
            servers: servers.into(),
            link_down: AtomicBool::new(false),
        }
    }

    /// Translate a client event into a status event, if it has one
    pub fn on_event(&self, event: &Event) -> Option<StatusEvent> {
        match event {
            Event::Connected => {
                if self.link_down.swap(false, Ordering::SeqCst) {
                    Some(StatusEvent::new(StatusKind::Reconnect, self.servers.clone()))
                } else {
                    debug!(servers = %self.servers, "Initial connect event, not a reconnect");
                    None
                }
            }
            Event::Disconnected => {
                self.link_down.store(true, Ordering::SeqCst);
                Some(StatusEvent::new(StatusKind::Disconnect, self.servers.clone()))
            }
            Event::LameDuckMode => Some(StatusEvent::new(StatusKind::LameDuck, self.servers.clone())),
            Event::SlowConsumer(sid) => {
                Some(StatusEvent::new(StatusKind::SlowConsumer, sid.to_string()))
            }
            Event::ServerError(err) => Some(StatusEvent::new(StatusKind::Error, err.to_string())),
            Event::ClientError(err) => Some(StatusEvent::new(StatusKind::Error, err.to_string())),
            other => Some(StatusEvent::new(
                StatusKind::Other(other.to_string()),
                self.servers.clone(),
            )),
        }
    }

    /// Reconnect attempts only count once an established link went down
    pub fn on_reconnect_attempt(&self, attempt: usize) -> Option<StatusEvent> {
        if self.link_down.load(Ordering::SeqCst) {
            Some(StatusEvent::new(
                StatusKind::Reconnecting,
                format!("{} (attempt {attempt})", self.servers),
            ))
        } else {
            None
        }
    }

    pub fn is_link_down(&self) -> bool {
        self.link_down.load(Ordering::SeqCst)
    }
}
