//! nats-link
//!
//! A client-side connection manager for NATS. It owns a single connection
//! handle, exposes lifecycle flags and notifications, and wraps publish,
//! subscribe and request with text and JSON codecs.
//!
//! # Quick Start
//!
//! ```no_run
//! use nats_link::provider::ConnectionManager;
//! use nats_link::transport::nats::NatsConnector;
//! use nats_link::transport::RequestOptions;
//! use nats_link::ConnectionOptions;
//! use std::sync::Arc;
//!
//! # async fn run() -> nats_link::ProviderResult<()> {
//! let manager = ConnectionManager::builder(Arc::new(NatsConnector::new()))
//!     .options(ConnectionOptions::with_servers(["nats://localhost:4222"]))
//!     .build();
//!
//! manager.wait_for(|flags| flags.connected).await;
//! manager.publish_text("greetings", Some("hello"), &Default::default()).await?;
//!
//! let reply = manager
//!     .request_json("time.now", None::<&()>, &RequestOptions::default())
//!     .await?;
//! println!("{}", reply.data);
//!
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod observability;
pub mod provider;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConnectionOptions, Field, OptionsUpdate, ProviderConfig};
pub use error::{ProviderError, ProviderResult};
pub use provider::{
    ConnectionManager, Notification, NotificationKind, NotificationObserver, StatusFlags,
    Subscription,
};
