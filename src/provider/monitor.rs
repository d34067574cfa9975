//! Status monitor for the active connection
//!
//! [`StatusMonitor::transition`] is the pure part: given the current flags and
//! a status event it returns the next flags and the notification to emit. The
//! spawned loop feeds it events from the connection's status sequence until
//! the manager closes, replaces the handle, or the sequence ends.

use super::notifier::{NotificationKind, Notifier};
use super::state::{StateStore, StatusFlags};
use crate::transport::{StatusEvent, StatusKind};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pure status transition logic
pub struct StatusMonitor;

impl StatusMonitor {
    /// Next flags and notification for an event (pure function)
    pub fn transition(
        flags: &StatusFlags,
        event: &StatusEvent,
    ) -> (StatusFlags, Option<NotificationKind>) {
        let mut next = *flags;
        let notification = match event.kind {
            StatusKind::Disconnect => {
                next.connected = false;
                Some(NotificationKind::Disconnect)
            }
            StatusKind::Reconnecting => {
                next.reconnecting = true;
                next.connecting = false;
                next.connected = false;
                Some(NotificationKind::Reconnecting)
            }
            StatusKind::Reconnect => {
                next.reconnecting = false;
                next.connecting = false;
                next.connected = true;
                Some(NotificationKind::Reconnect)
            }
            _ => None,
        };
        (next, notification)
    }

    /// Log a status event at a level matching its impact (pure logging function)
    pub fn log_event(connection_id: &str, event: &StatusEvent) {
        match event.kind {
            StatusKind::Disconnect => {
                error!(connection_id, data = %event.data, "Lost connection to NATS cluster")
            }
            StatusKind::Reconnecting => {
                warn!(connection_id, data = %event.data, "Reconnecting to NATS cluster")
            }
            StatusKind::Reconnect => {
                info!(connection_id, data = %event.data, "Reconnected to NATS cluster")
            }
            StatusKind::Error | StatusKind::SlowConsumer | StatusKind::LameDuck => {
                warn!(connection_id, kind = %event.kind, data = %event.data, "NATS status event")
            }
            _ => debug!(connection_id, kind = %event.kind, data = %event.data, "NATS status event"),
        }
    }

    /// Start the monitor loop for the handle installed at `generation`
    pub fn spawn(
        store: Arc<StateStore>,
        notifier: Notifier,
        generation: u64,
        connection_id: String,
        status: BoxStream<'static, StatusEvent>,
    ) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = MonitorTask {
            store,
            notifier,
            generation,
            connection_id: connection_id.clone(),
        };
        let join = tokio::spawn(task.run(status, stop_rx));
        MonitorHandle {
            connection_id,
            stop_tx,
            join,
        }
    }
}

/// Owner side of a running monitor
pub struct MonitorHandle {
    connection_id: String,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the loop to exit; it stops applying events immediately
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.join.await {
            warn!(connection_id = %self.connection_id, error = %e, "Status monitor task failed");
        }
    }
}

struct MonitorTask {
    store: Arc<StateStore>,
    notifier: Notifier,
    generation: u64,
    connection_id: String,
}

impl MonitorTask {
    async fn run(
        self,
        mut status: BoxStream<'static, StatusEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut flags_rx = self.store.subscribe();
        if flags_rx.borrow_and_update().closed {
            debug!(connection_id = %self.connection_id, "Manager already closed, monitor not started");
            return;
        }
        debug!(connection_id = %self.connection_id, "Status monitor started");

        loop {
            tokio::select! {
                biased;

                _ = stop_rx.changed() => {
                    debug!(connection_id = %self.connection_id, "Status monitor superseded");
                    break;
                }

                changed = flags_rx.changed() => {
                    if changed.is_err() || flags_rx.borrow_and_update().closed {
                        debug!(connection_id = %self.connection_id, "Manager closed, stopping status monitor");
                        break;
                    }
                }

                event = status.next() => match event {
                    Some(event) => self.handle_event(&event),
                    None => {
                        if !self.is_stale() {
                            warn!(connection_id = %self.connection_id, "NATS status sequence ended");
                        }
                        break;
                    }
                },
            }
        }
    }

    fn is_stale(&self) -> bool {
        self.store.generation() != self.generation || self.store.flags().closed
    }

    fn handle_event(&self, event: &StatusEvent) {
        StatusMonitor::log_event(&self.connection_id, event);

        // The generation check runs under the flags lock so a concurrent
        // close or re-open can never be overwritten by a stale event
        let mut emitted = None;
        self.store.update_flags_if(|flags| {
            if self.store.generation() != self.generation || flags.closed {
                return false;
            }
            let (next, notification) = StatusMonitor::transition(flags, event);
            emitted = notification;
            let changed = next != *flags;
            *flags = next;
            changed
        });

        match emitted {
            Some(kind) => {
                self.notifier.notify(kind);
            }
            None => debug!(
                connection_id = %self.connection_id,
                kind = %event.kind,
                "Status event did not change connection flags"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> StatusFlags {
        StatusFlags {
            closed: false,
            connecting: false,
            reconnecting: false,
            connected: true,
        }
    }

    #[test]
    fn test_disconnect_clears_connected() {
        let (next, notification) =
            StatusMonitor::transition(&connected(), &StatusEvent::new(StatusKind::Disconnect, ""));
        assert!(!next.connected);
        assert!(!next.closed);
        assert_eq!(notification, Some(NotificationKind::Disconnect));
    }

    #[test]
    fn test_reconnecting_then_reconnect() {
        let (reconnecting, first) = StatusMonitor::transition(
            &connected(),
            &StatusEvent::new(StatusKind::Reconnecting, ""),
        );
        assert!(reconnecting.reconnecting);
        assert!(!reconnecting.connected);
        assert!(reconnecting.is_consistent());
        assert_eq!(first, Some(NotificationKind::Reconnecting));

        let (reconnected, second) = StatusMonitor::transition(
            &reconnecting,
            &StatusEvent::new(StatusKind::Reconnect, ""),
        );
        assert!(reconnected.connected);
        assert!(!reconnected.reconnecting);
        assert!(reconnected.is_consistent());
        assert_eq!(second, Some(NotificationKind::Reconnect));
    }

    #[test]
    fn test_other_events_are_ignored() {
        for kind in [
            StatusKind::Update,
            StatusKind::LameDuck,
            StatusKind::SlowConsumer,
            StatusKind::Error,
            StatusKind::Other("pingTimer".to_string()),
        ] {
            let (next, notification) =
                StatusMonitor::transition(&connected(), &StatusEvent::new(kind, ""));
            assert_eq!(next, connected());
            assert_eq!(notification, None);
        }
    }

    #[test]
    fn test_repeated_disconnect_still_notifies() {
        let (once, _) =
            StatusMonitor::transition(&connected(), &StatusEvent::new(StatusKind::Disconnect, ""));
        let (twice, notification) =
            StatusMonitor::transition(&once, &StatusEvent::new(StatusKind::Disconnect, ""));
        assert_eq!(once, twice);
        assert_eq!(notification, Some(NotificationKind::Disconnect));
    }
}
