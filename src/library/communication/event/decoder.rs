use super::super::DecodeError;
use super::Payload;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Strongly typed event which is published on a well-known subject
pub trait Event: Serialize + DeserializeOwned + PartialEq + Debug + Send + Sync + 'static {
    /// Subject on which events of this type are published
    const SUBJECT: &'static str;
}

/// Converts raw [`Payloads`](Payload) into typed events
///
/// Implementations have to be pure: no side effects, no broker interaction and the same output for the same input.
/// Both the text and binary representation of a payload have to yield the same event.
pub trait Decoder: Send + Sync {
    /// Event type produced
    type Event: Send + 'static;

    /// Attempts to decode the payload
    fn decode(&self, payload: &Payload) -> Result<Self::Event, DecodeError>;
}
