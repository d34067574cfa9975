//! I/O side of the NATS adapter, built on `async-nats`
//!
//! Client events are translated by [`LinkTracker`] and queued on a
//! [`StatusFeed`] that the manager's status monitor drains.

use super::events::{LinkTracker, ReconnectBackoff};
use crate::config::ConnectionOptions;
use crate::error::{ProviderError, ProviderResult};
use crate::transport::{
    Connection, Connector, Headers, Message, PublishOptions, RawSubscription, RequestOptions,
    Responder, StatusEvent, StatusFeed, SubscribeOptions,
};
use async_nats::{Client, ConnectOptions, HeaderMap, RequestErrorKind, ServerAddr, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

static NEXT_SID: AtomicU64 = AtomicU64::new(1);

/// Opens `async-nats` connections
#[derive(Debug, Clone, Default)]
pub struct NatsConnector {
    backoff: ReconnectBackoff,
}

impl NatsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(backoff: ReconnectBackoff) -> Self {
        Self { backoff }
    }

    fn build_connect_options(
        &self,
        options: &ConnectionOptions,
        feed: Arc<StatusFeed>,
        tracker: Arc<LinkTracker>,
    ) -> ConnectOptions {
        let event_feed = feed.clone();
        let event_tracker = tracker.clone();
        let backoff = self.backoff.clone();

        let mut connect_options = ConnectOptions::new()
            .connection_timeout(options.connection_timeout)
            .ping_interval(options.ping_interval)
            .require_tls(options.tls)
            .max_reconnects(options.max_reconnects)
            .event_callback(move |event| {
                let feed = event_feed.clone();
                let tracker = event_tracker.clone();
                async move {
                    if let Some(status) = tracker.on_event(&event) {
                        feed.push(status);
                    }
                }
            })
            .reconnect_delay_callback(move |attempt| {
                if let Some(status) = tracker.on_reconnect_attempt(attempt) {
                    feed.push(status);
                }
                backoff.delay_for(attempt)
            });

        if let Some(name) = &options.name {
            connect_options = connect_options.name(name.as_str());
        }

        match (&options.user, &options.password, &options.token) {
            (Some(user), Some(password), _) => {
                connect_options = connect_options.user_and_password(user.clone(), password.clone());
            }
            (_, _, Some(token)) => {
                connect_options = connect_options.token(token.clone());
            }
            _ => {}
        }

        if options.no_echo {
            connect_options = connect_options.no_echo();
        }

        connect_options
    }
}

/// Parse configured servers into client addresses
pub fn parse_server_addrs(servers: &[String]) -> ProviderResult<Vec<ServerAddr>> {
    if servers.is_empty() {
        return Err(ProviderError::InvalidServer(
            "no servers configured".to_string(),
        ));
    }
    servers
        .iter()
        .map(|server| {
            ServerAddr::from_str(server).map_err(|_| {
                ProviderError::InvalidServer(crate::error::sanitize_error_message(server))
            })
        })
        .collect()
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(&self, options: &ConnectionOptions) -> ProviderResult<Arc<dyn Connection>> {
        let addrs = parse_server_addrs(&options.servers)?;
        let feed = Arc::new(StatusFeed::new());
        let tracker = Arc::new(LinkTracker::new(options.servers.join(",")));
        let connect_options = self.build_connect_options(options, feed.clone(), tracker);

        let client = connect_options
            .connect(addrs)
            .await
            .map_err(|e| ProviderError::connect_failure(e.to_string()))?;

        let connection = NatsConnection::new(client, feed);
        info!(connection_id = %connection.id, "Opened NATS connection");
        Ok(Arc::new(connection))
    }
}

/// A live `async-nats` connection
pub struct NatsConnection {
    id: String,
    client: RwLock<Option<Client>>,
    feed: Arc<StatusFeed>,
}

impl NatsConnection {
    fn new(client: Client, feed: Arc<StatusFeed>) -> Self {
        Self {
            id: format!("nats-{}", Uuid::new_v4()),
            client: RwLock::new(Some(client)),
            feed,
        }
    }

    async fn client(&self) -> ProviderResult<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(ProviderError::TransportClosed)
    }
}

#[async_trait]
impl Connection for NatsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> ProviderResult<()> {
        let client = self.client.write().await.take();
        self.feed.close();

        match client {
            Some(client) => {
                // Subscriptions and messages hold clones of the client, so the
                // connection is ended explicitly: drain unsubscribes everything,
                // flushes, and stops the connection handler from reconnecting.
                client
                    .drain()
                    .await
                    .map_err(|e| ProviderError::transport(e.to_string()))?;
                debug!(connection_id = %self.id, "Drained NATS client");
                Ok(())
            }
            None => Err(ProviderError::TransportClosed),
        }
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        let client = self.client().await?;
        publish_with(&client, subject, payload, options).await
    }

    async fn subscribe(
        &self,
        subject: &str,
        options: &SubscribeOptions,
    ) -> ProviderResult<Box<dyn RawSubscription>> {
        let client = self.client().await?;

        let mut subscriber = match &options.queue {
            Some(queue) => client
                .queue_subscribe(subject.to_string(), queue.clone())
                .await,
            None => client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| ProviderError::transport(e.to_string()))?;

        if let Some(max) = options.max {
            subscriber
                .unsubscribe_after(max)
                .await
                .map_err(|e| ProviderError::transport(e.to_string()))?;
        }

        Ok(Box::new(NatsSubscription {
            sid: NEXT_SID.fetch_add(1, Ordering::Relaxed),
            subject: subject.to_string(),
            inner: subscriber,
            closed: false,
            responder: Arc::new(NatsResponder { client }),
        }))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> ProviderResult<Message> {
        let client = self.client().await?;

        let mut request = async_nats::Request::new().payload(payload);
        if let Some(headers) = &options.headers {
            request = request.headers(to_header_map(headers));
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(Some(timeout));
        }

        let reply = client
            .send_request(subject.to_string(), request)
            .await
            .map_err(|e| match e.kind() {
                RequestErrorKind::NoResponders => ProviderError::no_responders(subject),
                RequestErrorKind::TimedOut => ProviderError::timeout(subject),
                RequestErrorKind::Other => ProviderError::transport(e.to_string()),
            })?;

        Ok(convert_message(reply, Arc::new(NatsResponder { client })))
    }

    fn status(&self) -> BoxStream<'static, StatusEvent> {
        self.feed.take_stream()
    }
}

async fn publish_with(
    client: &Client,
    subject: &str,
    payload: Bytes,
    options: &PublishOptions,
) -> ProviderResult<()> {
    let subject = subject.to_string();
    let result = match (&options.reply, &options.headers) {
        (None, None) => client.publish(subject, payload).await,
        (None, Some(headers)) => {
            client
                .publish_with_headers(subject, to_header_map(headers), payload)
                .await
        }
        (Some(reply), None) => {
            client
                .publish_with_reply(subject, reply.clone(), payload)
                .await
        }
        (Some(reply), Some(headers)) => {
            client
                .publish_with_reply_and_headers(
                    subject,
                    reply.clone(),
                    to_header_map(headers),
                    payload,
                )
                .await
        }
    };
    result.map_err(|e| ProviderError::transport(e.to_string()))
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map
}

fn from_header_map(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, values)| {
            values
                .first()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

fn convert_message(message: async_nats::Message, responder: Arc<dyn Responder>) -> Message {
    let converted = Message::new(message.subject.to_string(), message.payload)
        .with_headers(message.headers.as_ref().map(from_header_map))
        .with_responder(responder);
    match message.reply {
        Some(reply) => converted.with_reply(reply.to_string()),
        None => converted,
    }
}

struct NatsResponder {
    client: Client,
}

#[async_trait]
impl Responder for NatsResponder {
    async fn send_reply(
        &self,
        reply: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> ProviderResult<()> {
        publish_with(&self.client, reply, payload, options).await
    }
}

struct NatsSubscription {
    sid: u64,
    subject: String,
    inner: Subscriber,
    closed: bool,
    responder: Arc<NatsResponder>,
}

#[async_trait]
impl RawSubscription for NatsSubscription {
    fn sid(&self) -> u64 {
        self.sid
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next(&mut self) -> Option<Message> {
        let message = self.inner.next().await?;
        Some(convert_message(message, self.responder.clone()))
    }

    async fn unsubscribe(&mut self, max: Option<u64>) -> ProviderResult<()> {
        if self.closed {
            return Err(ProviderError::SubscriptionClosed);
        }

        let result = match max {
            Some(max) => self.inner.unsubscribe_after(max).await,
            None => self.inner.unsubscribe().await,
        };

        match result {
            Ok(()) => {
                self.closed = max.is_none();
                Ok(())
            }
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "Unsubscribe failed");
                self.closed = true;
                Err(ProviderError::SubscriptionClosed)
            }
        }
    }
}
