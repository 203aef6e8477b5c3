use crate::library::BoxedError;
use thiserror::Error;

/// Invalid listener or subscription configuration
///
/// These are detected before anything touches the broker and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Subject may not be empty
    #[error("subject may not be empty")]
    EmptySubject,
    /// Durable group name may not be empty
    #[error("durable group name may not be empty")]
    EmptyGroup,
    /// Durable name may not be empty
    #[error("durable name may not be empty")]
    EmptyDurableName,
    /// Acknowledgment window has to be a positive duration
    #[error("ack wait of {0}ms is not a positive duration")]
    AckWaitNotPositive(i64),
    /// Acknowledgment window is too short and would cause premature redelivery
    #[error("ack wait of {ack_wait_ms}ms is shorter than the minimum of {minimum_ms}ms")]
    AckWaitTooShort {
        /// Requested window
        ack_wait_ms: i64,
        /// Smallest accepted window
        minimum_ms: u64,
    },
    /// Listeners always acknowledge manually
    #[error("automatic acknowledgment is not supported, manual ack mode is required")]
    ManualAckRequired,
    /// At least one envelope has to be allowed in flight
    #[error("max in flight has to be at least one")]
    NoneInFlight,
    /// A dead letter threshold of zero would dead letter every message before processing
    #[error("max deliveries has to be at least one")]
    NoDeliveries,
    /// A listener allowed zero re-subscribe attempts would give up the moment its connection drops
    #[error("max reconnect attempts has to be at least one")]
    NoReconnectAttempts,
}

/// Failure while talking to the message broker
///
/// The listener never retries these itself when they are returned to the caller;
/// the host process is expected to retry with backoff.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Transport handle is currently not connected to the broker
    #[error("transport is not connected")]
    NotConnected,
    /// Transport handle has been closed and can no longer be used
    #[error("transport has been closed")]
    Closed,
    /// Connection to the broker was lost while receiving
    #[error("connection to the broker has been lost")]
    Disconnected,
    /// Broker delivered something that can not be turned into an envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// Error raised by the underlying client library
    #[error("broker operation failed")]
    Backend(#[source] BoxedError),
}

/// Payload could not be turned into an event
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not syntactically valid
    #[error("payload is malformed")]
    Malformed(#[source] BoxedError),
    /// Payload is valid but lacks required fields or has mismatching types
    #[error("payload does not match the event schema")]
    Schema(#[source] BoxedError),
}

/// Event could not be published
#[derive(Error, Debug)]
pub enum PublishError {
    /// Event could not be serialized
    #[error("event could not be encoded")]
    Encode(#[source] BoxedError),
    /// Broker rejected or did not receive the message
    #[error("transport failure while publishing")]
    Transport(#[from] TransportError),
}

/// Misuse of the listener state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Listener has been stopped and can not be started again
    #[error("listener has already been closed")]
    Closed,
}

/// Error returned when binding or starting a listener
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Invalid configuration
    #[error("invalid listener configuration")]
    Configuration(#[from] ConfigurationError),
    /// Broker could not be reached
    #[error("transport failure")]
    Transport(#[from] TransportError),
    /// Invalid state transition
    #[error("invalid listener lifecycle transition")]
    Lifecycle(#[from] LifecycleError),
}

impl ListenerError {
    /// Whether retrying the operation can not possibly succeed
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ListenerError::Transport(
                TransportError::NotConnected
                    | TransportError::Disconnected
                    | TransportError::Backend(_)
            )
        )
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn treat_configuration_and_lifecycle_as_fatal() {
        assert!(ListenerError::from(ConfigurationError::EmptySubject).is_fatal());
        assert!(ListenerError::from(LifecycleError::Closed).is_fatal());
        assert!(ListenerError::from(TransportError::Closed).is_fatal());
    }

    #[test]
    fn treat_connectivity_as_retryable() {
        assert!(!ListenerError::from(TransportError::NotConnected).is_fatal());
        assert!(!ListenerError::from(TransportError::Disconnected).is_fatal());
    }

    #[test]
    fn describe_short_ack_wait() {
        let error = ConfigurationError::AckWaitTooShort {
            ack_wait_ms: 500,
            minimum_ms: 1000,
        };

        assert_eq!(
            error.to_string(),
            "ack wait of 500ms is shorter than the minimum of 1000ms"
        );
    }
}
