//! In-process broker with durable group semantics
//!
//! The broker keeps an append-only log per subject and one durable cursor per group on each subject.
//! Envelopes are handed out round-robin to the members of a group, limited by the `max_in_flight` of each
//! member's [`SubscriptionPolicy`]. Deliveries which are not acknowledged within the ack wait window are
//! handed out again to whichever member has spare capacity next.
//!
//! It is a functional [`Transport`] meant for tests and short-lived single process setups. Nothing is ever
//! discarded: subject logs, per message delivery counts and every acknowledgment are kept for the lifetime of
//! the broker so that they can be inspected, memory usage thus grows with the number of published messages.
//! Connection loss can be simulated using [`disconnect`](InMemoryBroker::disconnect) and
//! [`reconnect`](InMemoryBroker::reconnect).

use crate::library::communication::event::{
    ConnectOptions, ConnectionStatus, DurableGroup, Envelope, Payload, Subject, Subscription,
    SubscriptionId, SubscriptionPolicy, Transport,
};
use crate::library::communication::TransportError;
use async_trait::async_trait;
use futures::channel::mpsc::unbounded;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

mod state;

pub use state::Acknowledgment;
use state::{GroupKey, Inner};

/// [`Envelope`] handed out by the [`InMemoryBroker`]
pub struct MemoryEnvelope {
    inner: Arc<Inner>,
    key: GroupKey,
    member: SubscriptionId,
    sequence: u64,
    delivery_count: u32,
    payload: Payload,
}

impl MemoryEnvelope {
    fn new(
        inner: Arc<Inner>,
        key: GroupKey,
        member: SubscriptionId,
        sequence: u64,
        delivery_count: u32,
        payload: Payload,
    ) -> Self {
        Self {
            inner,
            key,
            member,
            sequence,
            delivery_count,
            payload,
        }
    }

    fn ensure_connected(status: ConnectionStatus) -> Result<(), TransportError> {
        match status {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Reconnecting => Err(TransportError::NotConnected),
            ConnectionStatus::Closed => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Envelope for MemoryEnvelope {
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
        {
            let mut state = self.inner.lock();
            Self::ensure_connected(state.status)?;
            state.acknowledge(&self.key, self.sequence);
        }

        self.inner.wake();
        Ok(())
    }

    async fn reject(&mut self) -> Result<(), TransportError> {
        {
            let mut state = self.inner.lock();
            Self::ensure_connected(state.status)?;
            state.release(&self.key, self.sequence, self.member, Instant::now());
        }

        self.inner.wake();
        Ok(())
    }
}

/// In-process [`Transport`] implementation
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Creates a new, connected broker and spawns its delivery loop onto the current tokio runtime
    pub fn new() -> Self {
        let inner = Arc::new(Inner::new());
        tokio::spawn(delivery_loop(inner.clone()));
        Self { inner }
    }

    /// Simulates a connection loss: all subscriptions end, durable cursors and pending deliveries are retained
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.lock();
            if state.status != ConnectionStatus::Connected {
                return;
            }

            state.status = ConnectionStatus::Reconnecting;
            state.drop_members();
        }

        debug!("Broker connection lost");
        self.inner.wake();
    }

    /// Ends a simulated connection loss
    pub fn reconnect(&self) {
        {
            let mut state = self.inner.lock();
            if state.status != ConnectionStatus::Reconnecting {
                return;
            }

            state.status = ConnectionStatus::Connected;
        }

        debug!("Broker connection re-established");
        self.inner.wake();
    }

    /// Every acknowledgment call received so far, including repeated ones
    pub fn acknowledgments(&self) -> Vec<Acknowledgment> {
        self.inner.lock().acknowledgments.clone()
    }

    /// Sequence numbers acknowledged by a group in the order the acknowledgments arrived
    pub fn acknowledged(&self, subject: &str, group: &str) -> Vec<u64> {
        self.inner
            .lock()
            .acknowledgments
            .iter()
            .filter(|ack| ack.subject == subject && ack.group == group)
            .map(|ack| ack.sequence)
            .collect()
    }

    /// Number of times a sequence has been delivered to a group
    pub fn delivery_count(&self, subject: &str, group: &str, sequence: u64) -> u32 {
        self.inner
            .lock()
            .groups
            .get(&(subject.to_owned(), group.to_owned()))
            .and_then(|group| group.deliveries.get(&sequence).copied())
            .unwrap_or_default()
    }

    /// Sequences delivered to a group which have neither been acknowledged nor expired yet
    pub fn pending(&self, subject: &str, group: &str) -> Vec<u64> {
        self.inner
            .lock()
            .groups
            .get(&(subject.to_owned(), group.to_owned()))
            .map(|group| group.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// All payloads published on a subject
    pub fn messages(&self, subject: &str) -> Vec<Payload> {
        self.inner
            .lock()
            .logs
            .get(subject)
            .map(|log| log.iter().map(|(_, payload)| payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live members of a group
    pub fn member_count(&self, subject: &str, group: &str) -> usize {
        self.inner
            .lock()
            .groups
            .get(&(subject.to_owned(), group.to_owned()))
            .map(|group| group.members.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    type Envelope = MemoryEnvelope;

    async fn connect(options: &ConnectOptions) -> Result<Self, TransportError> {
        debug!(cluster = %options.cluster_id, client = %options.client_id, "Creating in-memory broker");
        Ok(Self::new())
    }

    fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    async fn publish(&self, subject: &Subject, payload: Payload) -> Result<u64, TransportError> {
        let sequence = {
            let mut state = self.inner.lock();
            MemoryEnvelope::ensure_connected(state.status)?;
            state.append(subject, payload)
        };

        trace!(%subject, sequence, "Published message");
        self.inner.wake();

        Ok(sequence)
    }

    async fn subscribe(
        &self,
        subject: &Subject,
        group: &DurableGroup,
        policy: &SubscriptionPolicy,
    ) -> Result<Subscription<Self::Envelope>, TransportError> {
        let (sender, receiver) = unbounded();

        let id = {
            let mut state = self.inner.lock();
            MemoryEnvelope::ensure_connected(state.status)?;
            state.join(
                subject,
                group,
                policy.replay_all(),
                sender,
                policy.max_in_flight(),
                policy.ack_wait(),
            )
        };

        debug!(%subject, %group, subscription = %id, "Member joined group");
        self.inner.wake();

        Ok(Subscription::new(id, receiver.map(Ok).boxed()))
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError> {
        {
            let mut state = self.inner.lock();
            MemoryEnvelope::ensure_connected(state.status)?;
            state.leave(subscription);
        }

        self.inner.wake();
        Ok(())
    }

    async fn close(&self) {
        {
            let mut state = self.inner.lock();
            state.status = ConnectionStatus::Closed;
            state.drop_members();
        }

        self.inner.wake();
    }
}

/// Hands out envelopes whenever something changes or a pending delivery expires
async fn delivery_loop(inner: Arc<Inner>) {
    loop {
        let next_deadline = {
            let mut state = inner.lock();
            if state.status == ConnectionStatus::Closed {
                break;
            }

            state.pump(&inner, Instant::now())
        };

        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = inner.wakeup.notified() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => inner.wakeup.notified().await,
        }
    }

    trace!("Delivery loop terminated");
}
