//! NATS transport adapter
//!
//! - [`events`] - pure translation of client events and reconnect pacing
//! - [`client`] - connector, connection and subscription over `async-nats`

pub mod client;
pub mod events;

pub use client::{parse_server_addrs, NatsConnection, NatsConnector};
pub use events::{LinkTracker, ReconnectBackoff};
