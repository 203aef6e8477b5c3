//! Serialization and deserialization provided by [`serde_json`]
//!
//! Events travel as UTF-8 encoded JSON objects. The [`JsonDecoder`] accepts them both as text and as raw bytes,
//! ignores unknown fields so that producers may add new ones without breaking consumers and only fails
//! when required fields are missing or have the wrong type. Every [`Transport`] automatically becomes an
//! [`EventPublisher`] which encodes events using [`serde_json`].

use super::super::event::{Decoder, Event, EventPublisher, Payload, Subject, Transport};
use super::super::{DecodeError, PublishError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use std::marker::PhantomData;

/// [`Decoder`] parsing JSON payloads into `E`
pub struct JsonDecoder<E> {
    event: PhantomData<fn() -> E>,
}

impl<E> Default for JsonDecoder<E> {
    fn default() -> Self {
        Self { event: PhantomData }
    }
}

impl<E> Decoder for JsonDecoder<E>
where
    E: DeserializeOwned + Send + 'static,
{
    type Event = E;

    /// Parses the payload using [`serde_json::from_str`] or [`serde_json::from_slice`] depending on its representation
    fn decode(&self, payload: &Payload) -> Result<E, DecodeError> {
        let result = match payload {
            Payload::Text(text) => serde_json::from_str(text),
            Payload::Binary(bytes) => serde_json::from_slice(bytes),
        };

        result.map_err(|error| match error.classify() {
            Category::Data => DecodeError::Schema(error.into()),
            Category::Io | Category::Syntax | Category::Eof => DecodeError::Malformed(error.into()),
        })
    }
}

/// Serializes a value into a text payload using [`serde_json::to_string`]
pub fn encode<T: Serialize>(value: &T) -> Result<Payload, PublishError> {
    serde_json::to_string(value)
        .map(Payload::Text)
        .map_err(|error| PublishError::Encode(error.into()))
}

#[async_trait]
impl<T> EventPublisher for T
where
    T: Transport,
{
    /// Serializes the event using [`serde_json::to_string`] and publishes it on [`Event::SUBJECT`]
    async fn publish_event<E: Event>(&self, event: &E) -> Result<u64, PublishError> {
        let payload = encode(event)?;
        let subject = Subject::new(E::SUBJECT).map_err(|error| PublishError::Encode(error.into()))?;
        let sequence = self.publish(&subject, payload).await?;

        Ok(sequence)
    }
}
