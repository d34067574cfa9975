//! Stand-in connection used before the first successful connect
//!
//! Every operation fails with `NotInitialized`; closing succeeds and the
//! status stream is empty. Each manager builds its own instance.

use super::{
    Connection, Message, PublishOptions, RawSubscription, RequestOptions, StatusEvent,
    SubscribeOptions,
};
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

#[derive(Debug)]
pub struct PlaceholderConnection {
    id: String,
}

impl PlaceholderConnection {
    pub fn new() -> Self {
        Self {
            id: format!("placeholder-{}", Uuid::new_v4()),
        }
    }
}

impl Default for PlaceholderConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for PlaceholderConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_placeholder(&self) -> bool {
        true
    }

    async fn close(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn publish(
        &self,
        _subject: &str,
        _payload: Bytes,
        _options: &PublishOptions,
    ) -> ProviderResult<()> {
        Err(ProviderError::NotInitialized)
    }

    async fn subscribe(
        &self,
        _subject: &str,
        _options: &SubscribeOptions,
    ) -> ProviderResult<Box<dyn RawSubscription>> {
        Err(ProviderError::NotInitialized)
    }

    async fn request(
        &self,
        _subject: &str,
        _payload: Bytes,
        _options: &RequestOptions,
    ) -> ProviderResult<Message> {
        Err(ProviderError::NotInitialized)
    }

    fn status(&self) -> BoxStream<'static, StatusEvent> {
        stream::empty().boxed()
    }
}
