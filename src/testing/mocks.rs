//! Mock implementations for testing
//!
//! Provides an in-memory broker behind mock `Connector`/`Connection`
//! implementations plus a recording observer, so the connection manager can be
//! tested without a NATS server.

use crate::config::ConnectionOptions;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Notification, NotificationKind, NotificationObserver};
use crate::transport::{
    Connection, Connector, Message, PublishOptions, RawSubscription, RequestOptions, Responder,
    StatusEvent, StatusFeed, StatusKind, SubscribeOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub type PublishedMessage = (String, Bytes);

/// Request timeout used when the caller sets none
pub const DEFAULT_MOCK_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// NATS subject matching with `*` (one token) and `>` (one or more trailing tokens)
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct MockSubscriber {
    sid: u64,
    owner: String,
    subject: String,
    queue: Option<String>,
    remaining: Option<u64>,
    tx: mpsc::UnboundedSender<Message>,
}

/// Shared in-memory message router
#[derive(Default)]
pub struct MockBroker {
    subscribers: Mutex<Vec<MockSubscriber>>,
    pending_replies: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    published: Mutex<Vec<PublishedMessage>>,
    next_sid: AtomicU64,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything published through any connection, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    fn register(
        &self,
        owner: &str,
        subject: &str,
        options: &SubscribeOptions,
    ) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(MockSubscriber {
                sid,
                owner: owner.to_string(),
                subject: subject.to_string(),
                queue: options.queue.clone(),
                remaining: options.max,
                tx,
            });
        }
        (sid, rx)
    }

    fn remove(&self, sid: u64) -> bool {
        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|sub| sub.sid != sid);
                subscribers.len() != before
            }
            Err(_) => false,
        }
    }

    fn limit(&self, sid: u64, max: u64) -> bool {
        match self.subscribers.lock() {
            Ok(mut subscribers) => match subscribers.iter_mut().find(|sub| sub.sid == sid) {
                Some(sub) => {
                    sub.remaining = Some(max);
                    if max == 0 {
                        subscribers.retain(|sub| sub.sid != sid);
                    }
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn drop_owner(&self, owner: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|sub| sub.owner != owner);
        }
    }

    /// Route a message; returns how many subscribers received it
    fn deliver(&self, message: Message) -> usize {
        if let Some(reply_tx) = self
            .pending_replies
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&message.subject))
        {
            return usize::from(reply_tx.send(message).is_ok());
        }

        let Ok(mut subscribers) = self.subscribers.lock() else {
            return 0;
        };

        let mut delivered = 0;
        let mut served_queues = HashSet::new();
        let mut exhausted = Vec::new();

        for sub in subscribers.iter_mut() {
            if !subject_matches(&sub.subject, &message.subject) {
                continue;
            }
            if let Some(queue) = &sub.queue {
                if !served_queues.insert(queue.clone()) {
                    continue;
                }
            }
            if sub.tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
            if let Some(remaining) = sub.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    exhausted.push(sub.sid);
                }
            }
        }

        subscribers.retain(|sub| !exhausted.contains(&sub.sid));
        delivered
    }

    fn publish(self: &Arc<Self>, subject: &str, payload: Bytes, options: &PublishOptions) {
        if let Ok(mut published) = self.published.lock() {
            published.push((subject.to_string(), payload.clone()));
        }
        let mut message = Message::new(subject, payload)
            .with_headers(options.headers.clone())
            .with_responder(Arc::new(MockResponder {
                broker: self.clone(),
            }));
        if let Some(reply) = &options.reply {
            message = message.with_reply(reply.clone());
        }
        self.deliver(message);
    }
}

struct MockResponder {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl Responder for MockResponder {
    async fn send_reply(
        &self,
        reply: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        self.broker.publish(reply, payload, options);
        Ok(())
    }
}

/// Mock connector handing out [`MockConnection`]s on a shared broker
#[derive(Default)]
pub struct MockConnector {
    broker: Arc<MockBroker>,
    should_fail: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    connect_count: AtomicUsize,
    last_options: Mutex<Option<ConnectionOptions>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        let connector = Self::default();
        connector.set_should_fail(true);
        connector
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Delay every connect attempt, to observe the in-flight state
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.connect_delay.lock() {
            *slot = delay;
        }
    }

    pub fn broker(&self) -> Arc<MockBroker> {
        self.broker.clone()
    }

    /// Number of connect attempts, failed ones included
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ConnectionOptions> {
        self.last_options.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections
            .lock()
            .map(|connections| connections.clone())
            .unwrap_or_default()
    }

    pub fn latest_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, options: &ConnectionOptions) -> ProviderResult<Arc<dyn Connection>> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_options.lock() {
            *slot = Some(options.clone());
        }

        let delay = self.connect_delay.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ProviderError::connect_failure("Mock connection failure"));
        }

        let connection = Arc::new(MockConnection::new(self.broker.clone()));
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(connection.clone());
        }
        Ok(connection)
    }
}

/// Mock connection backed by a [`MockBroker`]
pub struct MockConnection {
    id: String,
    broker: Arc<MockBroker>,
    feed: StatusFeed,
    closed: AtomicBool,
    close_count: AtomicUsize,
    fail_close: AtomicBool,
}

impl MockConnection {
    pub fn new(broker: Arc<MockBroker>) -> Self {
        Self {
            id: format!("mock-{}", Uuid::new_v4()),
            broker,
            feed: StatusFeed::new(),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        }
    }

    /// Inject a status event as if the transport reported it
    pub fn push_status(&self, kind: StatusKind) {
        self.feed.push(StatusEvent::new(kind, self.id.clone()));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Make `close` report an error (after still closing)
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> ProviderResult<()> {
        if self.is_closed() {
            Err(ProviderError::TransportClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> ProviderResult<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        let was_closed = self.closed.swap(true, Ordering::SeqCst);
        self.feed.close();
        self.broker.drop_owner(&self.id);

        if was_closed {
            return Err(ProviderError::TransportClosed);
        }
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProviderError::transport("Mock close failure"));
        }
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        self.ensure_open()?;
        self.broker.publish(subject, payload, options);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        options: &SubscribeOptions,
    ) -> ProviderResult<Box<dyn RawSubscription>> {
        self.ensure_open()?;
        let (sid, rx) = self.broker.register(&self.id, subject, options);
        Ok(Box::new(MockSubscription {
            sid,
            subject: subject.to_string(),
            rx,
            broker: self.broker.clone(),
            closed: false,
        }))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> ProviderResult<Message> {
        self.ensure_open()?;

        let inbox = format!("_INBOX.{}", Uuid::new_v4().simple());
        let (reply_tx, reply_rx) = oneshot::channel();
        if let Ok(mut pending) = self.broker.pending_replies.lock() {
            pending.insert(inbox.clone(), reply_tx);
        }

        let request = Message::new(subject, payload)
            .with_reply(inbox.clone())
            .with_headers(options.headers.clone())
            .with_responder(Arc::new(MockResponder {
                broker: self.broker.clone(),
            }));

        let forget_inbox = || {
            if let Ok(mut pending) = self.broker.pending_replies.lock() {
                pending.remove(&inbox);
            }
        };

        if self.broker.deliver(request) == 0 {
            forget_inbox();
            return Err(ProviderError::no_responders(subject));
        }

        let timeout = options.timeout.unwrap_or(DEFAULT_MOCK_REQUEST_TIMEOUT);
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                forget_inbox();
                Err(ProviderError::timeout(subject))
            }
        }
    }

    fn status(&self) -> BoxStream<'static, StatusEvent> {
        self.feed.take_stream()
    }
}

/// Mock subscription fed by the broker
pub struct MockSubscription {
    sid: u64,
    subject: String,
    rx: mpsc::UnboundedReceiver<Message>,
    broker: Arc<MockBroker>,
    closed: bool,
}

#[async_trait]
impl RawSubscription for MockSubscription {
    fn sid(&self) -> u64 {
        self.sid
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self, max: Option<u64>) -> ProviderResult<()> {
        if self.closed {
            return Err(ProviderError::SubscriptionClosed);
        }
        let known = match max {
            Some(max) => self.broker.limit(self.sid, max),
            None => self.broker.remove(self.sid),
        };
        if max.is_none() || !known {
            self.closed = true;
        }
        if known {
            Ok(())
        } else {
            Err(ProviderError::SubscriptionClosed)
        }
    }
}

/// Observer that records every notification it receives
#[derive(Debug, Default)]
pub struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|recorded| recorded.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notifications().iter().map(|n| n.id).collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        if let Ok(mut recorded) = self.notifications.lock() {
            recorded.clear();
        }
    }
}

impl NotificationObserver for RecordingObserver {
    fn on_status(&self, notification: &Notification) {
        if let Ok(mut recorded) = self.notifications.lock() {
            recorded.push(notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("foo", "foo"));
        assert!(!subject_matches("foo", "bar"));
        assert!(subject_matches("foo.*", "foo.bar"));
        assert!(!subject_matches("foo.*", "foo.bar.baz"));
        assert!(subject_matches("foo.>", "foo.bar.baz"));
        assert!(!subject_matches("foo.>", "foo"));
        assert!(!subject_matches("foo.bar", "foo"));
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let connection = MockConnection::new(MockBroker::new());
        let mut sub = connection
            .subscribe("foo", &SubscribeOptions::default())
            .await
            .unwrap();

        connection
            .publish("foo", Bytes::from_static(b"hello"), &PublishOptions::default())
            .await
            .unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_request_without_subscriber_is_no_responders() {
        let connection = MockConnection::new(MockBroker::new());
        let result = connection
            .request("bar", Bytes::new(), &RequestOptions::default())
            .await;
        assert!(matches!(result, Err(ProviderError::NoResponders { .. })));
    }

    #[tokio::test]
    async fn test_request_with_silent_subscriber_times_out() {
        let connection = MockConnection::new(MockBroker::new());
        let _sub = connection
            .subscribe("bar", &SubscribeOptions::default())
            .await
            .unwrap();

        let result = connection
            .request(
                "bar",
                Bytes::new(),
                &RequestOptions::with_timeout(Duration::from_millis(20)),
            )
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_max_ends_subscription() {
        let connection = MockConnection::new(MockBroker::new());
        let mut sub = connection
            .subscribe(
                "foo",
                &SubscribeOptions {
                    queue: None,
                    max: Some(1),
                },
            )
            .await
            .unwrap();

        for _ in 0..2 {
            connection
                .publish("foo", Bytes::new(), &PublishOptions::default())
                .await
                .unwrap();
        }

        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_observable_and_second_close_errors() {
        let connection = MockConnection::new(MockBroker::new());
        assert!(connection.close().await.is_ok());
        assert!(connection.is_closed());
        assert!(matches!(
            connection.close().await,
            Err(ProviderError::TransportClosed)
        ));
        assert_eq!(connection.close_count(), 2);
    }

    #[tokio::test]
    async fn test_connector_failure_toggle() {
        let connector = MockConnector::with_failure();
        assert!(connector
            .connect(&ConnectionOptions::default())
            .await
            .is_err());
        connector.set_should_fail(false);
        assert!(connector
            .connect(&ConnectionOptions::default())
            .await
            .is_ok());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.connections().len(), 1);
    }
}
