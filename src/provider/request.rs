//! Request/response wrappers with text and JSON codecs
//!
//! Requests fail with `NoResponders` when nobody is subscribed to the subject
//! and `Timeout` when a responder exists but stays silent. Replies come back
//! decoded, with a `respond` that re-encodes through the same codec.

use crate::codec;
use crate::error::ProviderResult;
use crate::transport::{Connection, Headers, Message, PublishOptions, RequestOptions};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A message decoded as text
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Option<Headers>,
    pub data: String,
    raw: Message,
}

impl TextMessage {
    pub fn from_message(raw: Message) -> Self {
        Self {
            subject: raw.subject.clone(),
            reply: raw.reply.clone(),
            headers: raw.headers.clone(),
            data: codec::load_text(&raw.payload),
            raw,
        }
    }

    pub fn raw(&self) -> &Message {
        &self.raw
    }

    /// Reply with text; `Ok(false)` when the message has no reply subject
    pub async fn respond(&self, data: Option<&str>, options: &PublishOptions) -> ProviderResult<bool> {
        self.raw.respond(codec::dump_text(data), options).await
    }
}

/// A message decoded as JSON
#[derive(Debug, Clone)]
pub struct JsonMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Option<Headers>,
    /// `Value::Null` for an empty payload
    pub data: Value,
    raw: Message,
}

impl JsonMessage {
    pub fn from_message(raw: Message) -> ProviderResult<Self> {
        let data = codec::load_json(&raw.payload)?;
        Ok(Self {
            subject: raw.subject.clone(),
            reply: raw.reply.clone(),
            headers: raw.headers.clone(),
            data,
            raw,
        })
    }

    pub fn raw(&self) -> &Message {
        &self.raw
    }

    /// Deserialize the payload into a concrete type
    pub fn data_as<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Reply with JSON; `None` sends an empty payload
    pub async fn respond<T: Serialize + ?Sized>(
        &self,
        data: Option<&T>,
        options: &PublishOptions,
    ) -> ProviderResult<bool> {
        let payload = codec::dump_json(data)?;
        self.raw.respond(payload, options).await
    }
}

pub async fn request(
    connection: &dyn Connection,
    subject: &str,
    payload: Bytes,
    options: &RequestOptions,
) -> ProviderResult<Message> {
    debug!(
        connection_id = %connection.id(),
        subject,
        payload_len = payload.len(),
        timeout_ms = ?options.timeout.map(|t| t.as_millis()),
        "Sending request"
    );
    connection.request(subject, payload, options).await
}

pub async fn request_text(
    connection: &dyn Connection,
    subject: &str,
    payload: Option<&str>,
    options: &RequestOptions,
) -> ProviderResult<TextMessage> {
    let reply = request(connection, subject, codec::dump_text(payload), options).await?;
    Ok(TextMessage::from_message(reply))
}

pub async fn request_json<T: Serialize + ?Sized>(
    connection: &dyn Connection,
    subject: &str,
    payload: Option<&T>,
    options: &RequestOptions,
) -> ProviderResult<JsonMessage> {
    let encoded = codec::dump_json(payload)?;
    let reply = request(connection, subject, encoded, options).await?;
    JsonMessage::from_message(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use serde_json::json;

    #[test]
    fn test_text_message_decodes_payload() {
        let msg = TextMessage::from_message(Message::new("foo", Bytes::from_static(b"hello")));
        assert_eq!(msg.data, "hello");
        assert_eq!(msg.subject, "foo");
        assert_eq!(msg.reply, None);
    }

    #[test]
    fn test_empty_text_payload_is_empty_string() {
        let msg = TextMessage::from_message(Message::new("foo", Bytes::new()));
        assert_eq!(msg.data, "");
    }

    #[test]
    fn test_json_message_empty_payload_is_null() {
        let msg = JsonMessage::from_message(Message::new("foo", Bytes::new())).unwrap();
        assert_eq!(msg.data, Value::Null);
    }

    #[test]
    fn test_json_message_typed_access() {
        let msg = JsonMessage::from_message(Message::new(
            "foo",
            Bytes::from_static(br#"{"a":1,"b":[true]}"#),
        ))
        .unwrap();
        assert_eq!(msg.data, json!({"a": 1, "b": [true]}));

        #[derive(serde::Deserialize)]
        struct Shape {
            a: u32,
        }
        assert_eq!(msg.data_as::<Shape>().unwrap().a, 1);
    }

    #[test]
    fn test_json_message_rejects_invalid_json() {
        let result = JsonMessage::from_message(Message::new("foo", Bytes::from_static(b"{nope")));
        assert!(matches!(result, Err(ProviderError::Codec(_))));
    }

    #[tokio::test]
    async fn test_respond_without_reply_is_false() {
        let msg = TextMessage::from_message(Message::new("foo", Bytes::from_static(b"x")));
        let sent = msg.respond(Some("pong"), &PublishOptions::default()).await.unwrap();
        assert!(!sent);
    }
}
