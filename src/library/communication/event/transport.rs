use super::super::{PublishError, TransportError};
use super::{DurableGroup, Envelope, Event, Payload, Subject, SubscriptionPolicy};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// Parameters required to establish a connection to a broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Identifier of the broker cluster, all services of one system use the same value
    pub cluster_id: String,
    /// Identifier of this client, unique among all connected clients
    pub client_id: String,
    /// Address of the broker
    pub endpoint: String,
}

/// Connectivity of a [`Transport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Broker is reachable
    Connected,
    /// Connection has been lost and is being re-established
    Reconnecting,
    /// Handle has been closed for good
    Closed,
}

/// Identifies a single subscription of a [`Transport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stream of envelopes delivered to a subscription
///
/// The stream ends when the subscription is cancelled or the connection to the broker is lost.
pub type DeliveryStream<E> = BoxStream<'static, Result<E, TransportError>>;

/// Handle to an active subscription
pub struct Subscription<E> {
    id: SubscriptionId,
    deliveries: DeliveryStream<E>,
}

impl<E> Subscription<E> {
    /// Creates a new instance from raw parts
    pub fn new(id: SubscriptionId, deliveries: DeliveryStream<E>) -> Self {
        Self { id, deliveries }
    }

    /// Identifier used to cancel the subscription
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Splits the handle into its identifier and the delivery stream
    pub fn into_parts(self) -> (SubscriptionId, DeliveryStream<E>) {
        (self.id, self.deliveries)
    }
}

/// Long-lived connection to a durable message broker
///
/// Implementations are expected to handle reconnects transparently. While reconnecting, the
/// [`status`](Transport::status) reports [`ConnectionStatus::Reconnecting`] and all delivery streams end.
/// Durable cursors are kept by the broker, thus subscribing with the same group again resumes where the
/// group left off.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Envelope type handed out by subscriptions
    type Envelope: Envelope + 'static;

    /// Establishes a new connection
    async fn connect(options: &ConnectOptions) -> Result<Self, TransportError>
    where
        Self: Sized;

    /// Current connectivity
    fn status(&self) -> ConnectionStatus;

    /// Appends a message to a subject and returns its sequence number
    async fn publish(&self, subject: &Subject, payload: Payload) -> Result<u64, TransportError>;

    /// Joins the durable group on the given subject, creating the group if it does not exist yet
    async fn subscribe(
        &self,
        subject: &Subject,
        group: &DurableGroup,
        policy: &SubscriptionPolicy,
    ) -> Result<Subscription<Self::Envelope>, TransportError>;

    /// Cancels a subscription. Unknown or already cancelled subscriptions are ignored.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError>;

    /// Closes the connection, ending all subscriptions
    async fn close(&self);
}

/// Publishes typed [`Events`](Event) on their subject
#[async_trait]
pub trait EventPublisher {
    /// Encodes and publishes the event, returning the assigned sequence number
    async fn publish_event<E: Event>(&self, event: &E) -> Result<u64, PublishError>;
}
