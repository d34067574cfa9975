//! Transport seam for the connection manager
//!
//! The manager never talks to a client library directly. It goes through
//! [`Connector`] (open a connection) and [`Connection`] (operate on one),
//! which keeps the lifecycle logic testable against an in-memory broker.

use crate::config::ConnectionOptions;
use crate::error::ProviderResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod nats;
pub mod placeholder;
pub mod status;

pub use placeholder::PlaceholderConnection;
pub use status::StatusFeed;

/// Message headers, one value per name
pub type Headers = BTreeMap<String, String>;

/// Options for a single publish
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub headers: Option<Headers>,
    pub reply: Option<String>,
}

/// Options for a single-shot request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Overrides the transport's default request timeout
    pub timeout: Option<Duration>,
    pub headers: Option<Headers>,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Shallow merge, fields present in `other` win
    pub fn merge(&self, other: &RequestOptions) -> Self {
        Self {
            timeout: other.timeout.or(self.timeout),
            headers: other.headers.clone().or_else(|| self.headers.clone()),
        }
    }
}

/// Options for a subscription
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
    /// Queue group for load-balanced delivery
    pub queue: Option<String>,
    /// Unsubscribe automatically after this many messages
    pub max: Option<u64>,
}

/// Sends a reply on behalf of a received message
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_reply(
        &self,
        reply: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()>;
}

/// A message delivered by the transport
#[derive(Clone)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Option<Headers>,
    pub payload: Bytes,
    responder: Option<Arc<dyn Responder>>,
}

impl Message {
    pub fn new<S: Into<String>>(subject: S, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload,
            responder: None,
        }
    }

    pub fn with_reply<S: Into<String>>(mut self, reply: S) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_headers(mut self, headers: Option<Headers>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Reply to this message; `Ok(false)` when it carries no reply subject
    pub async fn respond(&self, payload: Bytes, options: &PublishOptions) -> ProviderResult<bool> {
        match (&self.reply, &self.responder) {
            (Some(reply), Some(responder)) => {
                responder.send_reply(reply, payload, options).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("reply", &self.reply)
            .field("headers", &self.headers)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Kind of connectivity change reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    /// Link to the broker was lost
    Disconnect,
    /// Link was re-established
    Reconnect,
    /// Transport is attempting to re-establish the link
    Reconnecting,
    /// Cluster topology update
    Update,
    /// Server entered lame duck mode
    LameDuck,
    SlowConsumer,
    Error,
    Other(String),
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Disconnect => write!(f, "disconnect"),
            StatusKind::Reconnect => write!(f, "reconnect"),
            StatusKind::Reconnecting => write!(f, "reconnecting"),
            StatusKind::Update => write!(f, "update"),
            StatusKind::LameDuck => write!(f, "ldm"),
            StatusKind::SlowConsumer => write!(f, "slow_consumer"),
            StatusKind::Error => write!(f, "error"),
            StatusKind::Other(other) => write!(f, "{other}"),
        }
    }
}

/// One entry of a connection's status sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub kind: StatusKind,
    pub data: String,
}

impl StatusEvent {
    pub fn new<S: Into<String>>(kind: StatusKind, data: S) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }
}

/// Opens connections to a broker
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectionOptions) -> ProviderResult<Arc<dyn Connection>>;
}

/// A live (or placeholder) connection to a broker
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// True only for the stand-in used before the first successful connect
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Close the connection; the status stream ends afterwards
    async fn close(&self) -> ProviderResult<()>;

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()>;

    async fn subscribe(
        &self,
        subject: &str,
        options: &SubscribeOptions,
    ) -> ProviderResult<Box<dyn RawSubscription>>;

    /// Single-shot request. Fails with `NoResponders`, `Timeout` or a transport error.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> ProviderResult<Message>;

    /// Status sequence for this connection. Non-restartable: later calls
    /// return an empty stream.
    fn status(&self) -> BoxStream<'static, StatusEvent>;
}

/// Subscription handle as returned by the transport
#[async_trait]
pub trait RawSubscription: Send {
    fn sid(&self) -> u64;

    fn subject(&self) -> &str;

    /// Next delivered message; `None` once the subscription has ended
    async fn next(&mut self) -> Option<Message>;

    /// Cancel the subscription, optionally after `max` more messages.
    /// Fails with `SubscriptionClosed` if it was already cancelled.
    async fn unsubscribe(&mut self, max: Option<u64>) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingResponder {
        sent: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl Responder for CapturingResponder {
        async fn send_reply(
            &self,
            reply: &str,
            payload: Bytes,
            _options: &PublishOptions,
        ) -> ProviderResult<()> {
            self.sent
                .lock()
                .map_err(|_| ProviderError::transport("poisoned"))?
                .push((reply.to_string(), payload));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_respond_without_reply_subject_returns_false() {
        let responder = Arc::new(CapturingResponder::default());
        let msg = Message::new("foo", Bytes::new()).with_responder(responder.clone());

        let sent = msg
            .respond(Bytes::from_static(b"x"), &PublishOptions::default())
            .await
            .unwrap();

        assert!(!sent);
        assert!(responder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_respond_forwards_to_reply_subject() {
        let responder = Arc::new(CapturingResponder::default());
        let msg = Message::new("foo", Bytes::new())
            .with_reply("_INBOX.1")
            .with_responder(responder.clone());

        let sent = msg
            .respond(Bytes::from_static(b"pong"), &PublishOptions::default())
            .await
            .unwrap();

        assert!(sent);
        let captured = responder.sent.lock().unwrap().clone();
        assert_eq!(
            captured,
            vec![("_INBOX.1".to_string(), Bytes::from_static(b"pong"))]
        );
    }

    #[test]
    fn test_request_options_merge() {
        let base = RequestOptions::with_timeout(Duration::from_secs(1));
        let mut headers = Headers::new();
        headers.insert("k".to_string(), "v".to_string());
        let update = RequestOptions {
            timeout: None,
            headers: Some(headers.clone()),
        };

        let merged = base.merge(&update);
        assert_eq!(merged.timeout, Some(Duration::from_secs(1)));
        assert_eq!(merged.headers, Some(headers));
    }

    #[test]
    fn test_status_kind_display() {
        assert_eq!(StatusKind::Disconnect.to_string(), "disconnect");
        assert_eq!(StatusKind::Reconnecting.to_string(), "reconnecting");
        assert_eq!(StatusKind::Other("pingTimer".into()).to_string(), "pingTimer");
    }
}
