use super::super::TransportError;
use super::{DurableGroup, Subject};
use async_trait::async_trait;
use std::borrow::Cow;

/// Raw content of a message as handed out by the broker
///
/// Depending on the client library, brokers hand out either text or binary data for the
/// same published content. Both represent the same bytes and decoders are expected to treat them equally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text representation
    Text(String),
    /// Binary representation
    Binary(Vec<u8>),
}

impl Payload {
    /// Underlying bytes regardless of representation
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Lossy text representation, mostly useful for log output
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(text) => Cow::Borrowed(text),
            Payload::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload contains no bytes at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(bytes.to_vec())
    }
}

/// Unit of delivery handed out by a [`Transport`](super::Transport)
///
/// Envelopes remain pending at the broker until they are acknowledged. If that does not happen within the
/// ack wait window of the subscription, the broker redelivers the envelope to any member of the group.
#[async_trait]
pub trait Envelope: Send + Sync {
    /// Monotonically increasing number, unique within a subject
    fn sequence(&self) -> u64;

    /// Content of the envelope
    fn payload(&self) -> &Payload;

    /// How often this sequence has been delivered to the group, starting at one
    fn delivery_count(&self) -> u32;

    /// Marks the sequence as consumed for the group. Repeated calls are harmless.
    async fn acknowledge(&mut self) -> Result<(), TransportError>;

    /// Hands the envelope back to the broker so it may be redelivered without waiting for the ack window
    async fn reject(&mut self) -> Result<(), TransportError>;
}

/// Metadata about an envelope passed to [`Handlers`](super::Handler) alongside the decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Subject the envelope was received on
    pub subject: Subject,
    /// Group the receiving listener belongs to
    pub group: DurableGroup,
    /// Sequence number of the envelope
    pub sequence: u64,
    /// Number of times the sequence has been delivered to the group
    pub delivery_count: u32,
}

impl Delivery {
    /// Whether the envelope has been delivered before, either to this or another group member
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }
}
