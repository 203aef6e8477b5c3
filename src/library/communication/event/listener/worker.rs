use super::super::super::TransportError;
use super::super::{
    ConnectionStatus, Decoder, Delivery, DeliveryStream, DurableGroup, Envelope, Handler,
    Subject, SubscriptionId, SubscriptionPolicy, Transport,
};
use crate::library::helpers::Backoff;
use futures::{FutureExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(25);

/// Reason why the delivery worker of a [`Listener`](super::Listener) ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Listener has been stopped or dropped
    Stopped,
    /// Transport has been closed for good
    TransportClosed,
    /// Subscription could not be re-established after the connection was lost
    ReconnectFailed,
}

/// Slot holding the subscription the worker currently receives from
pub(super) type ActiveSubscription = Arc<Mutex<Option<SubscriptionId>>>;

enum Received<E> {
    Envelope(E, OwnedSemaphorePermit),
    Skipped,
    Ended,
    Shutdown,
}

/// Everything required to process a single envelope
pub(super) struct Dispatcher<T, D, H> {
    pub transport: Arc<T>,
    pub subject: Subject,
    pub group: DurableGroup,
    pub dead_letter: Subject,
    pub max_deliveries: Option<u32>,
    pub decoder: Arc<D>,
    pub handler: Arc<H>,
}

impl<T, D, H> Dispatcher<T, D, H>
where
    T: Transport,
    D: Decoder,
    H: Handler<Event = D::Event>,
{
    /// Decodes the envelope, hands it to the handler and acknowledges it if that succeeded
    pub async fn dispatch(&self, mut envelope: T::Envelope) {
        let delivery = Delivery {
            subject: self.subject.clone(),
            group: self.group.clone(),
            sequence: envelope.sequence(),
            delivery_count: envelope.delivery_count(),
        };

        debug!(
            sequence = delivery.sequence,
            delivery = delivery.delivery_count,
            "Message received"
        );

        let processed = match self.decoder.decode(envelope.payload()) {
            Ok(event) => match self.handler.handle(event, &delivery).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(sequence = delivery.sequence, ?error, "Handler failed to process event");
                    false
                }
            },
            Err(error) => {
                warn!(sequence = delivery.sequence, ?error, "Failed to decode payload");
                false
            }
        };

        if processed {
            if let Err(error) = envelope.acknowledge().await {
                warn!(sequence = delivery.sequence, ?error, "Failed to acknowledge envelope");
            }
        } else if self.is_exhausted(&delivery) {
            self.dead_letter(&mut envelope, &delivery).await;
        }
    }

    fn is_exhausted(&self, delivery: &Delivery) -> bool {
        matches!(self.max_deliveries, Some(max) if delivery.delivery_count >= max)
    }

    async fn dead_letter(&self, envelope: &mut T::Envelope, delivery: &Delivery) {
        let payload = envelope.payload().clone();

        match self.transport.publish(&self.dead_letter, payload).await {
            Ok(dead_letter_sequence) => {
                warn!(
                    sequence = delivery.sequence,
                    dead_letter = %self.dead_letter,
                    dead_letter_sequence,
                    "Moved message to dead letter subject"
                );

                if let Err(error) = envelope.acknowledge().await {
                    warn!(sequence = delivery.sequence, ?error, "Failed to acknowledge dead lettered envelope");
                }
            }
            Err(error) => {
                error!(sequence = delivery.sequence, ?error, "Failed to dead letter message");
            }
        }
    }
}

/// Background task pulling envelopes from a subscription and dispatching them
pub(super) struct Worker<T, D, H> {
    pub dispatcher: Arc<Dispatcher<T, D, H>>,
    pub durable: DurableGroup,
    pub policy: SubscriptionPolicy,
    pub active: ActiveSubscription,
    pub shutdown: watch::Receiver<bool>,
}

impl<T, D, H> Worker<T, D, H>
where
    T: Transport,
    D: Decoder + 'static,
    H: Handler<Event = D::Event> + 'static,
{
    pub async fn run(mut self, mut deliveries: DeliveryStream<T::Envelope>) -> WorkerExit {
        let capacity = self.policy.max_in_flight();
        let permits = Arc::new(Semaphore::new(capacity));

        let exit = loop {
            match self.receive(&mut deliveries, &permits).await {
                Received::Envelope(envelope, permit) => {
                    let dispatcher = self.dispatcher.clone();

                    tokio::spawn(async move {
                        dispatcher.dispatch(envelope).await;
                        drop(permit);
                    });
                }
                Received::Skipped => {}
                Received::Shutdown => break WorkerExit::Stopped,
                Received::Ended => match self.resubscribe().await {
                    Ok(stream) => deliveries = stream,
                    Err(exit) => break exit,
                },
            }
        };

        release_undispatched(deliveries).await;

        // Every in-flight dispatch holds a permit, getting all of them back means everything has finished
        if permits.acquire_many(capacity as u32).await.is_err() {
            error!("Dispatch semaphore has been closed unexpectedly");
        }

        exit
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn receive(
        &mut self,
        deliveries: &mut DeliveryStream<T::Envelope>,
        permits: &Arc<Semaphore>,
    ) -> Received<T::Envelope> {
        if self.is_shutting_down() {
            return Received::Shutdown;
        }

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.changed() => return Received::Shutdown,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Received::Shutdown,
            },
        };

        tokio::select! {
            biased;
            _ = self.shutdown.changed() => Received::Shutdown,
            item = deliveries.next() => match item {
                Some(Ok(envelope)) => Received::Envelope(envelope, permit),
                Some(Err(TransportError::MalformedEnvelope(reason))) => {
                    warn!(%reason, "Skipping malformed envelope");
                    Received::Skipped
                }
                Some(Err(error)) => {
                    warn!(?error, "Delivery stream failed");
                    Received::Ended
                }
                None => Received::Ended,
            },
        }
    }

    /// Subscribes again with the identical durable group once the transport is back
    async fn resubscribe(&mut self) -> Result<DeliveryStream<T::Envelope>, WorkerExit> {
        self.clear_active();

        let transport = self.dispatcher.transport.clone();
        let subject = self.dispatcher.subject.clone();
        let attempts = self.policy.max_reconnect_attempts().unwrap_or(u32::MAX);
        let backoff =
            Backoff::new(RESUBSCRIBE_INITIAL_DELAY, attempts).with_ceiling(self.policy.ack_wait());

        info!("Subscription ended, attempting to re-subscribe");

        for delay in backoff {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return Err(WorkerExit::Stopped),
                _ = sleep(delay) => {}
            }

            if self.is_shutting_down() {
                return Err(WorkerExit::Stopped);
            }

            match transport.status() {
                ConnectionStatus::Closed => return Err(WorkerExit::TransportClosed),
                ConnectionStatus::Reconnecting => continue,
                ConnectionStatus::Connected => {}
            }

            match transport.subscribe(&subject, &self.durable, &self.policy).await {
                Ok(subscription) => {
                    let (id, stream) = subscription.into_parts();
                    self.set_active(id);
                    info!(subscription = %id, "Re-subscribed");
                    return Ok(stream);
                }
                Err(TransportError::Closed) => return Err(WorkerExit::TransportClosed),
                Err(error) => warn!(?error, "Failed to re-subscribe"),
            }
        }

        error!(attempts, "Giving up on re-subscribing");
        Err(WorkerExit::ReconnectFailed)
    }

    fn set_active(&self, id: SubscriptionId) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(id);
        }
    }

    fn clear_active(&self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }
}

/// Hands back envelopes which have already been delivered to this worker but will never be dispatched
async fn release_undispatched<E: Envelope>(mut deliveries: DeliveryStream<E>) {
    while let Some(Some(item)) = deliveries.next().now_or_never() {
        if let Ok(mut envelope) = item {
            let sequence = envelope.sequence();

            if let Err(error) = envelope.reject().await {
                debug!(sequence, ?error, "Failed to release undispatched envelope");
            }
        }
    }
}
