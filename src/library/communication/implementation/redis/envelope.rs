use super::super::super::event::{Envelope, Payload};
use super::super::super::TransportError;
use super::{backend, STREAM_PAYLOAD_FIELD, STREAM_SEQUENCE_FIELD};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamId;
use redis::AsyncCommands;
use tracing::trace;

/// Redis based implementation of the [`Envelope`] trait
pub struct RedisEnvelope {
    con: ConnectionManager,
    id: String,
    key: String,
    group: String,
    sequence: u64,
    delivery_count: u32,
    payload: Payload,
}

impl RedisEnvelope {
    pub(super) fn new(
        con: ConnectionManager,
        entry: StreamEntry,
        key: String,
        group: String,
        delivery_count: u32,
    ) -> Self {
        Self {
            con,
            id: entry.id,
            key,
            group,
            sequence: entry.sequence,
            delivery_count,
            payload: entry.payload,
        }
    }
}

#[async_trait]
impl Envelope for RedisEnvelope {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    async fn acknowledge(&mut self) -> Result<(), TransportError> {
        self.con
            .xack::<_, _, _, ()>(&self.key, &self.group, &[&self.id])
            .await
            .map_err(backend)
    }

    /// Entries stay in the pending entries list until they are claimed again once the ack wait window elapsed
    async fn reject(&mut self) -> Result<(), TransportError> {
        trace!(id = %self.id, "Leaving rejected entry pending");
        Ok(())
    }
}

/// Fields extracted from a raw stream entry
#[derive(Debug, PartialEq)]
pub(super) struct StreamEntry {
    pub id: String,
    pub sequence: u64,
    pub payload: Payload,
}

impl StreamEntry {
    /// Extracts the sequence and payload, returns the reason if either is missing
    pub fn parse(entry: &StreamId) -> Result<Self, String> {
        let sequence: u64 = entry
            .get(STREAM_SEQUENCE_FIELD)
            .ok_or_else(|| format!("entry {} carries no {} field", entry.id, STREAM_SEQUENCE_FIELD))?;

        let payload: Vec<u8> = entry
            .get(STREAM_PAYLOAD_FIELD)
            .ok_or_else(|| format!("entry {} carries no {} field", entry.id, STREAM_PAYLOAD_FIELD))?;

        let payload = match String::from_utf8(payload) {
            Ok(text) => Payload::Text(text),
            Err(error) => Payload::Binary(error.into_bytes()),
        };

        Ok(Self {
            id: entry.id.clone(),
            sequence,
            payload,
        })
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use redis::Value;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &[u8])]) -> StreamId {
        let map: HashMap<String, Value> = fields
            .iter()
            .map(|(key, value)| (key.to_string(), Value::Data(value.to_vec())))
            .collect();

        StreamId {
            id: "1526919030474-55".into(),
            map,
        }
    }

    #[test]
    fn parse_complete_entries() {
        let parsed = StreamEntry::parse(&entry(&[
            ("sequence", &b"42"[..]),
            ("payload", &br#"{"id":"abc","price":20}"#[..]),
        ]))
        .unwrap();

        assert_eq!(parsed.id, "1526919030474-55");
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.payload, Payload::from(r#"{"id":"abc","price":20}"#));
    }

    #[test]
    fn keep_invalid_utf8_as_binary() {
        let parsed =
            StreamEntry::parse(&entry(&[("sequence", &b"1"[..]), ("payload", &b"\xff\xfe"[..])]))
                .unwrap();
        assert_eq!(parsed.payload, Payload::Binary(vec![0xff, 0xfe]));
    }

    #[test]
    fn reject_incomplete_entries() {
        assert!(StreamEntry::parse(&entry(&[("payload", &b"{}"[..])])).is_err());
        assert!(StreamEntry::parse(&entry(&[("sequence", &b"1"[..])])).is_err());
    }
}
