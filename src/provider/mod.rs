//! Connection manager for a NATS client
//!
//! - [`lifecycle`] - open/close/update/reconnect and the outward operations
//! - [`state`] - flags, active handle and applied options
//! - [`monitor`] - reacts to the connection's status sequence
//! - [`notifier`] - observer hooks for lifecycle transitions
//! - [`request`] - text and JSON request/response wrappers
//! - [`subscription`] - subscriptions that tolerate double unsubscribe
//! - [`tracker`] - reactive request and subscription helpers

pub mod lifecycle;
pub mod monitor;
pub mod notifier;
pub mod request;
pub mod state;
pub mod subscription;
pub mod tracker;

pub use lifecycle::{ConnectionManager, ConnectionManagerBuilder};
pub use monitor::{MonitorHandle, StatusMonitor};
pub use notifier::{
    Notification, NotificationKind, NotificationObserver, Notifier, Severity, TracingObserver,
};
pub use request::{JsonMessage, TextMessage};
pub use state::{StateStore, StatusFlags};
pub use subscription::Subscription;
pub use tracker::{RequestErrorRecord, RequestState, RequestTracker, SubscriptionBinding};
