//! Trait implementations using [`redis`](::redis)
//!
//! Every subject is stored as a [Redis Stream](https://redis.io/topics/streams-intro) below the cluster namespace
//! and durable groups map onto stream consumer groups. Sequence numbers are allocated by a counter next to the
//! stream which is incremented atomically with each `XADD`. Redelivery of envelopes that have not been acknowledged
//! within the ack wait window is implemented by periodically claiming idle entries from the pending entries list,
//! which relies on the `IDLE` filter of `XPENDING` and thus requires Redis 6.2 or newer.
//!
//! Commands other than the blocking reads share one [`ConnectionManager`](::redis::aio::ConnectionManager) which
//! reconnects on its own after the server went away. The transport reports
//! [`Reconnecting`](super::super::event::ConnectionStatus::Reconnecting) until redis answers again.

const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";
const STREAM_SEQUENCE_FIELD: &str = "sequence";
const STREAM_PAYLOAD_FIELD: &str = "payload";
const SEQUENCE_KEY_SUFFIX: &str = ":sequence";

use super::super::TransportError;
use redis::RedisError;

mod consumer;
mod envelope;
mod health;
mod transport;

pub use envelope::*;
pub use transport::*;

fn backend(error: RedisError) -> TransportError {
    if is_unreachable(&error) {
        TransportError::Disconnected
    } else {
        TransportError::Backend(error.into())
    }
}

/// Whether the error is caused by the server being unreachable rather than by the command itself
fn is_unreachable(error: &RedisError) -> bool {
    error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_io_error()
        || error.is_timeout()
}

/// Key of the stream holding all messages of a subject
fn stream_key(namespace: &str, subject: &str) -> String {
    format!("{}.{}", namespace, subject)
}

fn sequence_key(stream: &str) -> String {
    format!("{}{}", stream, SEQUENCE_KEY_SUFFIX)
}

#[cfg(test)]
mod does {
    use super::*;
    use redis::ErrorKind;
    use std::io;

    #[test]
    fn namespace_stream_keys() {
        assert_eq!(stream_key("ticketing", "ticket:created"), "ticketing.ticket:created");
        assert_eq!(
            sequence_key("ticketing.ticket:created"),
            "ticketing.ticket:created:sequence"
        );
    }

    #[test]
    fn treat_dropped_connections_as_disconnects() {
        let error = RedisError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert!(matches!(backend(error), TransportError::Disconnected));

        let error = RedisError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(backend(error), TransportError::Disconnected));
    }

    #[test]
    fn keep_command_errors_as_backend_failures() {
        let error = RedisError::from((ErrorKind::ResponseError, "NOGROUP", "No such consumer group".to_owned()));
        assert!(matches!(backend(error), TransportError::Backend(_)));
    }
}
