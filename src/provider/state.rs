//! Connection state store
//!
//! Passive state behind the lifecycle controller. Flags are published on a
//! `watch` channel so observers see every transition; the handle, options and
//! monitor live behind an async lock that is never held across transport I/O.

use super::monitor::MonitorHandle;
use crate::config::ConnectionOptions;
use crate::transport::{Connection, PlaceholderConnection};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Observable lifecycle flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    /// User intent is "closed"
    pub closed: bool,
    pub connecting: bool,
    pub reconnecting: bool,
    pub connected: bool,
}

impl StatusFlags {
    /// Flags of a freshly constructed manager
    pub fn initial() -> Self {
        Self {
            closed: true,
            connecting: false,
            reconnecting: false,
            connected: false,
        }
    }

    /// Check the flag invariants
    pub fn is_consistent(&self) -> bool {
        let single_attempt = !(self.connecting && self.reconnecting);
        let connected_is_settled = !self.connected || (!self.connecting && !self.reconnecting);
        let closed_is_disconnected = !self.closed || !self.connected;
        single_attempt && connected_is_settled && closed_is_disconnected
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::initial()
    }
}

struct ConnectionState {
    handle: Arc<dyn Connection>,
    placeholder: Arc<dyn Connection>,
    /// `handle` is a real connection rather than the placeholder
    live: bool,
    /// Set by the first successful connect and never cleared
    ever_connected: bool,
    options: ConnectionOptions,
    monitor: Option<MonitorHandle>,
}

pub struct StateStore {
    flags: watch::Sender<StatusFlags>,
    inner: RwLock<ConnectionState>,
    generation: AtomicU64,
}

impl StateStore {
    pub fn new(options: ConnectionOptions) -> Self {
        let placeholder: Arc<dyn Connection> = Arc::new(PlaceholderConnection::new());
        let (flags, _) = watch::channel(StatusFlags::initial());
        Self {
            flags,
            inner: RwLock::new(ConnectionState {
                handle: placeholder.clone(),
                placeholder,
                live: false,
                ever_connected: false,
                options,
                monitor: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn flags(&self) -> StatusFlags {
        *self.flags.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusFlags> {
        self.flags.subscribe()
    }

    pub(crate) fn update_flags<F: FnOnce(&mut StatusFlags)>(&self, modify: F) {
        self.flags.send_modify(modify);
    }

    /// Modify flags only if `modify` reports a change; observers are woken only then
    pub(crate) fn update_flags_if<F: FnOnce(&mut StatusFlags) -> bool>(&self, modify: F) -> bool {
        self.flags.send_if_modified(modify)
    }

    /// Current handle epoch; bumped whenever the handle is replaced or released
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn handle(&self) -> Arc<dyn Connection> {
        self.inner.read().await.handle.clone()
    }

    /// True until the first successful connect; a later close does not reset it
    pub async fn is_placeholder(&self) -> bool {
        !self.inner.read().await.ever_connected
    }

    pub async fn options(&self) -> ConnectionOptions {
        self.inner.read().await.options.clone()
    }

    pub(crate) async fn set_options(&self, options: ConnectionOptions) {
        self.inner.write().await.options = options;
    }

    /// Snapshot taken at the start of an open: (live handle, ever connected, options)
    pub(crate) async fn open_snapshot(
        &self,
    ) -> (Option<Arc<dyn Connection>>, bool, ConnectionOptions) {
        let state = self.inner.read().await;
        let live = state.live.then(|| state.handle.clone());
        (live, state.ever_connected, state.options.clone())
    }

    pub(crate) async fn install(&self, handle: Arc<dyn Connection>) {
        let mut state = self.inner.write().await;
        state.handle = handle;
        state.live = true;
        state.ever_connected = true;
    }

    /// Put the placeholder back; returns the released real handle, if any
    pub(crate) async fn restore_placeholder(&self) -> Option<Arc<dyn Connection>> {
        let mut state = self.inner.write().await;
        if !state.live {
            return None;
        }
        let placeholder = state.placeholder.clone();
        let released = std::mem::replace(&mut state.handle, placeholder);
        state.live = false;
        Some(released)
    }

    pub(crate) async fn replace_monitor(&self, monitor: Option<MonitorHandle>) -> Option<MonitorHandle> {
        let mut state = self.inner.write().await;
        std::mem::replace(&mut state.monitor, monitor)
    }

    /// Best-effort synchronous teardown for `Drop`
    pub(crate) fn try_release(&self) -> Option<(Option<Arc<dyn Connection>>, Option<MonitorHandle>)> {
        let mut state = self.inner.try_write().ok()?;
        let monitor = state.monitor.take();
        let released = if !state.live {
            None
        } else {
            let placeholder = state.placeholder.clone();
            state.live = false;
            Some(std::mem::replace(&mut state.handle, placeholder))
        };
        Some((released, monitor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_flags() {
        let flags = StatusFlags::initial();
        assert!(flags.closed);
        assert!(!flags.connecting);
        assert!(!flags.reconnecting);
        assert!(!flags.connected);
        assert!(flags.is_consistent());
    }

    #[test]
    fn test_inconsistent_flags_detected() {
        let both_attempts = StatusFlags {
            closed: false,
            connecting: true,
            reconnecting: true,
            connected: false,
        };
        assert!(!both_attempts.is_consistent());

        let connected_while_connecting = StatusFlags {
            closed: false,
            connecting: true,
            reconnecting: false,
            connected: true,
        };
        assert!(!connected_while_connecting.is_consistent());

        let closed_but_connected = StatusFlags {
            closed: true,
            connecting: false,
            reconnecting: false,
            connected: true,
        };
        assert!(!closed_but_connected.is_consistent());
    }

    #[tokio::test]
    async fn test_store_starts_with_placeholder() {
        let store = StateStore::new(ConnectionOptions::default());
        assert!(store.is_placeholder().await);
        assert!(store.handle().await.is_placeholder());
        assert_eq!(store.restore_placeholder().await.map(|_| ()), None);
    }

    #[tokio::test]
    async fn test_release_keeps_connected_history() {
        let store = StateStore::new(ConnectionOptions::default());
        let connection: Arc<dyn Connection> =
            Arc::new(crate::testing::MockConnection::new(crate::testing::MockBroker::new()));

        store.install(connection.clone()).await;
        let released = store.restore_placeholder().await.expect("Live handle should be released");

        assert_eq!(released.id(), connection.id());
        assert!(store.handle().await.is_placeholder());
        assert!(!store.is_placeholder().await);
        let (live, ever_connected, _) = store.open_snapshot().await;
        assert!(live.is_none());
        assert!(ever_connected);
    }

    #[tokio::test]
    async fn test_stores_get_distinct_placeholders() {
        let a = StateStore::new(ConnectionOptions::default());
        let b = StateStore::new(ConnectionOptions::default());
        assert_ne!(a.handle().await.id(), b.handle().await.id());
    }

    #[test]
    fn test_generation_bumps() {
        let store = StateStore::new(ConnectionOptions::default());
        assert_eq!(store.generation(), 0);
        assert_eq!(store.bump_generation(), 1);
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn test_flag_updates_reach_subscribers() {
        let store = StateStore::new(ConnectionOptions::default());
        let mut rx = store.subscribe();

        store.update_flags(|f| f.connecting = true);

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().connecting);
    }
}
