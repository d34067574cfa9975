//! Connection lifecycle controller
//!
//! [`ConnectionManager`] owns the single active connection handle. Before the
//! first successful connect (and after every close) the handle is a
//! placeholder that rejects all operations with `NotInitialized`.
//!
//! Opens are serialized through a gate. A `connect`/`reconnect` claims the
//! pending open atomically; one issued while another open is claimed or in
//! flight waits for it to finish and returns without starting a second
//! attempt. `update` and `close` queue behind the gate and then run.

use super::monitor::{MonitorHandle, StatusMonitor};
use super::notifier::{NotificationKind, NotificationObserver, Notifier, TracingObserver};
use super::request::{self, JsonMessage, TextMessage};
use super::state::{StateStore, StatusFlags};
use super::subscription::{self, Subscription};
use crate::codec;
use crate::config::{ConnectionOptions, OptionsUpdate, ProviderConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::transport::nats::NatsConnector;
use crate::transport::{
    Connection, Connector, Message, PublishOptions, RequestOptions, SubscribeOptions,
};
use crate::{connection_span, request_span};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn, Instrument};

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    observer: Arc<dyn NotificationObserver>,
    auto_connect: bool,
}

impl ConnectionManagerBuilder {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            options: ConnectionOptions::default(),
            observer: Arc::new(TracingObserver),
            auto_connect: true,
        }
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn NotificationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Open immediately after construction (default `true`)
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Build the manager. With auto-connect on, the first open runs on a
    /// spawned task; use [`ConnectionManager::wait_for`] to await it.
    pub fn build(self) -> Arc<ConnectionManager> {
        let (open_done, _) = watch::channel(0);
        let manager = Arc::new(ConnectionManager {
            connector: self.connector,
            store: Arc::new(StateStore::new(self.options)),
            notifier: Notifier::new(self.observer),
            open_gate: Mutex::new(()),
            opening: AtomicBool::new(false),
            open_done,
        });

        if self.auto_connect {
            match tokio::runtime::Handle::try_current() {
                // Claimed before returning so an early `connect()` joins this open
                Ok(runtime) if manager.claim_open() => {
                    let auto = manager.clone();
                    runtime.spawn(async move { auto.run_claimed_open().await });
                }
                Ok(_) => {}
                Err(_) => warn!("No tokio runtime available, skipping auto-connect"),
            }
        }

        manager
    }
}

/// Owns the connection handle and its lifecycle flags
///
/// ```
/// # tokio_test::block_on(async {
/// use nats_link::provider::ConnectionManager;
/// use nats_link::testing::MockConnector;
/// use std::sync::Arc;
///
/// let manager = ConnectionManager::builder(Arc::new(MockConnector::new()))
///     .auto_connect(false)
///     .build();
/// assert!(manager.is_closed());
///
/// manager.connect().await;
/// assert!(manager.is_connected());
///
/// manager.shutdown().await;
/// assert!(manager.is_closed());
/// # });
/// ```
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    store: Arc<StateStore>,
    notifier: Notifier,
    open_gate: Mutex<()>,
    /// An open is claimed or running
    opening: AtomicBool,
    /// Bumped each time a claimed open finishes
    open_done: watch::Sender<u64>,
}

impl ConnectionManager {
    pub fn builder(connector: Arc<dyn Connector>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(connector)
    }

    /// Manager over the NATS transport, configured from a loaded config file
    pub fn from_config(
        config: &ProviderConfig,
        observer: Arc<dyn NotificationObserver>,
    ) -> ProviderResult<Arc<Self>> {
        config.validate()?;
        Ok(Self::builder(Arc::new(NatsConnector::new()))
            .options(config.connection_options())
            .observer(observer)
            .auto_connect(config.provider.auto_connect)
            .build())
    }

    pub fn flags(&self) -> StatusFlags {
        self.store.flags()
    }

    /// Handle epoch, bumped on every open and close
    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    /// Receiver that observes every flag transition
    pub fn watch_flags(&self) -> watch::Receiver<StatusFlags> {
        self.store.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.flags().connected
    }

    pub fn is_connecting(&self) -> bool {
        self.flags().connecting
    }

    pub fn is_reconnecting(&self) -> bool {
        self.flags().reconnecting
    }

    pub fn is_closed(&self) -> bool {
        self.flags().closed
    }

    /// Wait until the flags satisfy `predicate` and return them
    pub async fn wait_for<F>(&self, mut predicate: F) -> StatusFlags
    where
        F: FnMut(&StatusFlags) -> bool,
    {
        let mut rx = self.store.subscribe();
        loop {
            {
                let flags = rx.borrow_and_update();
                if predicate(&*flags) {
                    return *flags;
                }
            }
            // The sender lives in our own store, so it cannot be dropped here
            if rx.changed().await.is_err() {
                return self.store.flags();
            }
        }
    }

    /// The active handle, or the placeholder when not connected
    pub async fn handle(&self) -> Arc<dyn Connection> {
        self.store.handle().await
    }

    /// True until the first successful connect. After a close the handle is
    /// the placeholder again, but this stays false.
    pub async fn is_placeholder(&self) -> bool {
        self.store.is_placeholder().await
    }

    pub async fn options(&self) -> ConnectionOptions {
        self.store.options().await
    }

    /// Open a connection. Failures surface as a `connect-failure`
    /// notification, never as an error.
    pub async fn connect(&self) {
        // Subscribe before claiming so a finish between the two is not missed
        let mut done_rx = self.open_done.subscribe();
        if self.claim_open() {
            self.run_claimed_open().await;
        } else {
            let _ = done_rx.changed().await;
            debug!("Joined in-flight connection attempt");
        }
    }

    /// Same as [`connect`](Self::connect); replaces the current handle
    pub async fn reconnect(&self) {
        self.connect().await;
    }

    /// Merge `update` into the stored options, then reopen with them
    pub async fn update(&self, update: OptionsUpdate) {
        self.opening.store(true, Ordering::SeqCst);
        let _gate = self.open_gate.lock().await;
        let merged = self.store.options().await.merge(&update);
        debug!(servers = ?merged.servers, "Connection options updated");
        self.store.set_options(merged).await;
        self.open_locked().await;
    }

    /// Close the active connection. Idempotent.
    pub async fn close(&self) {
        if let Some(monitor) = self.release().await {
            monitor.stop();
        }
    }

    /// Close and wait for the status monitor to exit
    pub async fn shutdown(&self) {
        if let Some(monitor) = self.release().await {
            monitor.shutdown().await;
        }
        debug!("Connection manager shut down");
    }

    async fn release(&self) -> Option<MonitorHandle> {
        let _gate = self.open_gate.lock().await;
        if self.store.flags().closed {
            debug!("Close requested on a closed connection manager");
            return None;
        }

        self.store.bump_generation();
        let monitor = self.store.replace_monitor(None).await;
        if let Some(monitor) = &monitor {
            monitor.stop();
        }

        if let Some(released) = self.store.restore_placeholder().await {
            if let Err(e) = released.close().await {
                debug!(connection_id = %released.id(), error = %e, "Ignoring error while closing connection");
            }
        }

        self.store.update_flags(|flags| *flags = StatusFlags::initial());
        info!("NATS connection closed");
        monitor
    }

    fn claim_open(&self) -> bool {
        self.opening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn run_claimed_open(&self) {
        let _gate = self.open_gate.lock().await;
        self.open_locked().await;
    }

    /// Runs with the gate held; always releases the claim on `opening`
    async fn open_locked(&self) {
        let generation = self.store.bump_generation();
        let (previous, ever_connected, options) = self.store.open_snapshot().await;
        let span = connection_span!(generation, servers = ?options.servers);

        async {
            if let Some(monitor) = self.store.replace_monitor(None).await {
                monitor.stop();
            }

            if ever_connected {
                self.notifier.notify(NotificationKind::Reconnecting);
            } else {
                self.notifier.notify(NotificationKind::Connecting);
            }
            if let Some(previous) = previous {
                if let Err(e) = previous.close().await {
                    debug!(connection_id = %previous.id(), error = %e, "Ignoring error while closing previous connection");
                }
            }

            self.store.update_flags(|flags| {
                flags.connected = false;
                flags.reconnecting = false;
                flags.connecting = true;
            });

            match self.connector.connect(&options).await {
                Ok(handle) => {
                    let connection_id = handle.id().to_string();
                    self.store.install(handle.clone()).await;
                    self.store.update_flags(|flags| {
                        flags.closed = false;
                        flags.connecting = false;
                        flags.reconnecting = false;
                        flags.connected = true;
                    });
                    self.notifier.notify(NotificationKind::ConnectSuccess);
                    info!(connection_id = %connection_id, "Connected to NATS cluster");

                    let monitor = StatusMonitor::spawn(
                        self.store.clone(),
                        self.notifier.clone(),
                        generation,
                        connection_id,
                        handle.status(),
                    );
                    self.store.replace_monitor(Some(monitor)).await;
                }
                Err(e) => {
                    warn!(error = %e, code = e.code(), "Failed to connect to NATS cluster");
                    self.store.update_flags(|flags| flags.connecting = false);
                    self.notifier.notify(NotificationKind::ConnectFailure);
                }
            }
        }
        .instrument(span)
        .await;

        self.opening.store(false, Ordering::SeqCst);
        self.open_done.send_modify(|finished| *finished += 1);
    }

    pub async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        self.handle().await.publish(subject, payload, options).await
    }

    pub async fn publish_text(
        &self,
        subject: &str,
        payload: Option<&str>,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        self.publish(subject, codec::dump_text(payload), options).await
    }

    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        payload: Option<&T>,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        let encoded = codec::dump_json(payload)?;
        self.publish(subject, encoded, options).await
    }

    pub async fn subscribe(
        &self,
        subject: &str,
        options: &SubscribeOptions,
    ) -> ProviderResult<Subscription> {
        let handle = self.handle().await;
        subscription::subscribe(handle.as_ref(), subject, options).await
    }

    pub async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> ProviderResult<Message> {
        let handle = self.handle().await;
        request::request(handle.as_ref(), subject, payload, options)
            .instrument(request_span!(subject, codec = "raw"))
            .await
    }

    pub async fn request_text(
        &self,
        subject: &str,
        payload: Option<&str>,
        options: &RequestOptions,
    ) -> ProviderResult<TextMessage> {
        let handle = self.handle().await;
        request::request_text(handle.as_ref(), subject, payload, options)
            .instrument(request_span!(subject, codec = "text"))
            .await
    }

    pub async fn request_json<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        payload: Option<&T>,
        options: &RequestOptions,
    ) -> ProviderResult<JsonMessage> {
        let handle = self.handle().await;
        request::request_json(handle.as_ref(), subject, payload, options)
            .instrument(request_span!(subject, codec = "json"))
            .await
    }

    /// Fail fast with `NotInitialized` unless a real handle is installed
    pub async fn require_connection(&self) -> ProviderResult<Arc<dyn Connection>> {
        let handle = self.handle().await;
        if handle.is_placeholder() {
            return Err(ProviderError::NotInitialized);
        }
        Ok(handle)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.store.bump_generation();
        self.store.update_flags(|flags| *flags = StatusFlags::initial());

        if let Some((released, monitor)) = self.store.try_release() {
            if let Some(monitor) = monitor {
                monitor.stop();
            }
            if let Some(connection) = released {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        if let Err(e) = connection.close().await {
                            debug!(error = %e, "Ignoring error while closing connection on drop");
                        }
                    });
                }
            }
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("flags", &self.flags())
            .field("generation", &self.store.generation())
            .finish_non_exhaustive()
    }
}
