//! Subscription handles that tolerate double unsubscribe
//!
//! Cancelling a subscription that is already gone is a no-op here, which lets
//! cleanup paths unsubscribe unconditionally.

use crate::error::{ProviderError, ProviderResult};
use crate::transport::{Connection, Message, RawSubscription, SubscribeOptions};
use std::fmt;
use tracing::debug;

/// A normalized subscription
pub struct Subscription {
    inner: Box<dyn RawSubscription>,
}

impl Subscription {
    pub fn new(inner: Box<dyn RawSubscription>) -> Self {
        Self { inner }
    }

    pub fn sid(&self) -> u64 {
        self.inner.sid()
    }

    pub fn subject(&self) -> &str {
        self.inner.subject()
    }

    /// Next delivered message; `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<Message> {
        self.inner.next().await
    }

    /// Cancel now. Succeeds if the subscription was already cancelled.
    pub async fn unsubscribe(&mut self) -> ProviderResult<()> {
        self.unsubscribe_after(None).await
    }

    /// Cancel after `max` more messages, or now when `max` is `None`
    pub async fn unsubscribe_after(&mut self, max: Option<u64>) -> ProviderResult<()> {
        match self.inner.unsubscribe(max).await {
            Ok(()) => Ok(()),
            Err(ProviderError::SubscriptionClosed) => {
                debug!(
                    sid = self.inner.sid(),
                    subject = %self.inner.subject(),
                    "Subscription already closed, ignoring unsubscribe"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.inner.sid())
            .field("subject", &self.inner.subject())
            .finish()
    }
}

/// Subscribe through `connection` and wrap the handle
pub async fn subscribe(
    connection: &dyn Connection,
    subject: &str,
    options: &SubscribeOptions,
) -> ProviderResult<Subscription> {
    let raw = connection.subscribe(subject, options).await?;
    debug!(
        connection_id = %connection.id(),
        sid = raw.sid(),
        subject,
        queue = ?options.queue,
        "Subscribed"
    );
    Ok(Subscription::new(raw))
}
