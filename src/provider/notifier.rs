//! Notification dispatch for connection lifecycle transitions
//!
//! Dispatch is synchronous: the observer runs on the caller's task before the
//! transition returns. Each hook on [`NotificationObserver`] falls back to
//! [`NotificationObserver::on_status`], so an observer can handle everything
//! in one place or override individual transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Severity attached to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// The six lifecycle transitions observers can hook into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Connecting,
    Reconnecting,
    Reconnect,
    ConnectSuccess,
    ConnectFailure,
    Disconnect,
}

impl NotificationKind {
    pub fn id(&self) -> &'static str {
        match self {
            NotificationKind::Connecting => "connecting",
            NotificationKind::Reconnecting => "reconnecting",
            NotificationKind::Reconnect => "reconnect",
            NotificationKind::ConnectSuccess => "connect-success",
            NotificationKind::ConnectFailure => "connect-failure",
            NotificationKind::Disconnect => "disconnect",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            NotificationKind::Connecting => "Connection attempt",
            NotificationKind::Reconnecting => "Reconnection attempt",
            NotificationKind::Reconnect => "Successfully reconnected",
            NotificationKind::ConnectSuccess => "Successfully connected",
            NotificationKind::ConnectFailure => "Connection failure",
            NotificationKind::Disconnect => "Disconnection",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            NotificationKind::Connecting => "Attempting to connect to NATS server",
            NotificationKind::Reconnecting => "Attempting to reconnect to NATS server",
            NotificationKind::Reconnect => "Successfully reconnected to NATS server",
            NotificationKind::ConnectSuccess => "Connected to NATS cluster",
            NotificationKind::ConnectFailure => "Failed to connect to NATS cluster",
            NotificationKind::Disconnect => "Lost connection to NATS cluster",
        }
    }

    fn severity(&self) -> Severity {
        match self {
            NotificationKind::Connecting
            | NotificationKind::Reconnect
            | NotificationKind::ConnectSuccess => Severity::Info,
            NotificationKind::Reconnecting => Severity::Warning,
            NotificationKind::ConnectFailure | NotificationKind::Disconnect => Severity::Error,
        }
    }

    /// Build the notification payload for this transition
    pub fn notification(&self) -> Notification {
        Notification {
            title: self.title().to_string(),
            description: self.description().to_string(),
            severity: self.severity(),
            id: *self,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Payload delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub id: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

/// Receives lifecycle notifications
pub trait NotificationObserver: Send + Sync {
    /// Catch-all hook; every specific hook delegates here unless overridden
    fn on_status(&self, _notification: &Notification) {}

    fn on_connecting(&self, notification: &Notification) {
        self.on_status(notification)
    }

    fn on_reconnecting(&self, notification: &Notification) {
        self.on_status(notification)
    }

    fn on_reconnect(&self, notification: &Notification) {
        self.on_status(notification)
    }

    fn on_connect(&self, notification: &Notification) {
        self.on_status(notification)
    }

    fn on_connect_failure(&self, notification: &Notification) {
        self.on_status(notification)
    }

    fn on_disconnect(&self, notification: &Notification) {
        self.on_status(notification)
    }
}

/// Default observer: writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl NotificationObserver for TracingObserver {
    fn on_status(&self, notification: &Notification) {
        match notification.severity {
            Severity::Error => error!(
                notification = %notification.id,
                "{}: {}", notification.title, notification.description
            ),
            Severity::Warning => warn!(
                notification = %notification.id,
                "{}: {}", notification.title, notification.description
            ),
            Severity::Success | Severity::Info => info!(
                notification = %notification.id,
                "{}: {}", notification.title, notification.description
            ),
        }
    }
}

/// Routes transitions to the hooks of an injected observer
#[derive(Clone)]
pub struct Notifier {
    observer: Arc<dyn NotificationObserver>,
}

impl Notifier {
    pub fn new(observer: Arc<dyn NotificationObserver>) -> Self {
        Self { observer }
    }

    pub fn notify(&self, kind: NotificationKind) -> Notification {
        let notification = kind.notification();
        match kind {
            NotificationKind::Connecting => self.observer.on_connecting(&notification),
            NotificationKind::Reconnecting => self.observer.on_reconnecting(&notification),
            NotificationKind::Reconnect => self.observer.on_reconnect(&notification),
            NotificationKind::ConnectSuccess => self.observer.on_connect(&notification),
            NotificationKind::ConnectFailure => self.observer.on_connect_failure(&notification),
            NotificationKind::Disconnect => self.observer.on_disconnect(&notification),
        }
        notification
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CatchAll {
        seen: Mutex<Vec<NotificationKind>>,
    }

    impl NotificationObserver for CatchAll {
        fn on_status(&self, notification: &Notification) {
            self.seen.lock().unwrap().push(notification.id);
        }
    }

    #[derive(Default)]
    struct DisconnectOnly {
        disconnects: Mutex<u32>,
        fallback: Mutex<u32>,
    }

    impl NotificationObserver for DisconnectOnly {
        fn on_status(&self, _notification: &Notification) {
            *self.fallback.lock().unwrap() += 1;
        }

        fn on_disconnect(&self, _notification: &Notification) {
            *self.disconnects.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_hooks_fall_back_to_on_status() {
        let observer = Arc::new(CatchAll::default());
        let notifier = Notifier::new(observer.clone());

        notifier.notify(NotificationKind::Connecting);
        notifier.notify(NotificationKind::ConnectSuccess);

        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![NotificationKind::Connecting, NotificationKind::ConnectSuccess]
        );
    }

    #[test]
    fn test_specific_hook_overrides_fallback() {
        let observer = Arc::new(DisconnectOnly::default());
        let notifier = Notifier::new(observer.clone());

        notifier.notify(NotificationKind::Disconnect);
        notifier.notify(NotificationKind::Reconnecting);

        assert_eq!(*observer.disconnects.lock().unwrap(), 1);
        assert_eq!(*observer.fallback.lock().unwrap(), 1);
    }

    #[test]
    fn test_notification_payloads() {
        let failure = NotificationKind::ConnectFailure.notification();
        assert_eq!(failure.severity, Severity::Error);
        assert_eq!(failure.id.id(), "connect-failure");

        let reconnecting = NotificationKind::Reconnecting.notification();
        assert_eq!(reconnecting.severity, Severity::Warning);
        assert_eq!(reconnecting.title, "Reconnection attempt");
    }

    #[test]
    fn test_notification_serializes_kebab_case_id() {
        let json = serde_json::to_value(NotificationKind::ConnectSuccess.notification()).unwrap();
        assert_eq!(json["id"], "connect-success");
        assert_eq!(json["severity"], "info");
    }
}
