use super::super::implementation::json::JsonDecoder;
use super::super::{ConfigurationError, LifecycleError, ListenerError, TransportError};
use super::{
    ConnectionStatus, Decoder, DurableGroup, Event, Handler, Subject, SubscriptionPolicy,
    Transport,
};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

mod worker;

use worker::{ActiveSubscription, Dispatcher, Worker};
pub use worker::WorkerExit;

/// Lifecycle state of a [`Listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not subscribed, either never started or the delivery worker ended on its own
    Unbound,
    /// Receiving and dispatching envelopes
    Subscribed,
    /// Stopped for good
    Closed,
}

struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<WorkerExit>,
}

/// Consumes a subject as a member of a durable group
///
/// A listener binds a [`Subject`], a [`DurableGroup`], a [`SubscriptionPolicy`], a [`Decoder`] and a [`Handler`].
/// Once started, every envelope delivered by the [`Transport`] is decoded and passed to the handler. Envelopes are
/// only acknowledged after the handler returned successfully, everything else is left to the broker which redelivers
/// unacknowledged envelopes once the ack wait window of the policy elapses.
///
/// ```text
/// Unbound ──start()──▶ Subscribed ──stop()──▶ Closed
///    ▲                     │
///    └── worker exited ────┘
/// ```
///
/// When the delivery worker gives up, e.g. because the transport has been closed or re-subscribing failed,
/// the listener falls back to [`ListenerState::Unbound`] and may be started again.
pub struct Listener<T, D, H>
where
    T: Transport,
    D: Decoder,
    H: Handler<Event = D::Event>,
{
    transport: Arc<T>,
    subject: Subject,
    group: DurableGroup,
    durable: DurableGroup,
    dead_letter: Subject,
    policy: SubscriptionPolicy,
    decoder: Arc<D>,
    handler: Arc<H>,
    state: ListenerState,
    active: ActiveSubscription,
    worker: Option<WorkerHandle>,
    exit_tx: Arc<watch::Sender<Option<WorkerExit>>>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
}

impl<T, D, H> Listener<T, D, H>
where
    T: Transport,
    D: Decoder + 'static,
    H: Handler<Event = D::Event> + 'static,
{
    /// Creates a new, unbound listener
    ///
    /// Fails when the subject or group are empty or the policy is invalid. Nothing is sent to the broker
    /// until [`start`](Self::start) is called.
    pub fn bind(
        transport: Arc<T>,
        subject: impl Into<String>,
        group: impl Into<String>,
        policy: SubscriptionPolicy,
        decoder: D,
        handler: H,
    ) -> Result<Self, ConfigurationError> {
        let subject = Subject::new(subject)?;
        let group = DurableGroup::new(group)?;
        policy.validate()?;

        let durable = match policy.durable_name() {
            Some(name) => DurableGroup::new(name)?,
            None => group.clone(),
        };

        let dead_letter = policy
            .dead_letter_subject()
            .cloned()
            .unwrap_or_else(|| subject.dead_letter());

        let (exit_tx, exit_rx) = watch::channel(None);

        Ok(Self {
            transport,
            subject,
            group,
            durable,
            dead_letter,
            policy,
            decoder: Arc::new(decoder),
            handler: Arc::new(handler),
            state: ListenerState::Unbound,
            active: Arc::new(Mutex::new(None)),
            worker: None,
            exit_tx: Arc::new(exit_tx),
            exit_rx,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        match self.state {
            ListenerState::Subscribed if self.worker_exited() => ListenerState::Unbound,
            state => state,
        }
    }

    fn worker_exited(&self) -> bool {
        matches!(*self.exit_rx.borrow(), Some(exit) if exit != WorkerExit::Stopped)
    }

    /// Cleans up after a delivery worker which ended without being stopped
    async fn reap_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join.await {
                Ok(exit) => info!(?exit, "Delivery worker ended, listener is unbound again"),
                Err(error) => error!(?error, "Delivery worker panicked"),
            }
        }

        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }

        self.exit_tx.send(None).ok();
        self.state = ListenerState::Unbound;
    }

    /// Subject this listener consumes
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Group this listener is a member of
    pub fn group(&self) -> &DurableGroup {
        &self.group
    }

    /// Name under which the broker persists the cursor of the group
    pub fn durable_name(&self) -> &DurableGroup {
        &self.durable
    }

    /// Policy used when subscribing
    pub fn policy(&self) -> &SubscriptionPolicy {
        &self.policy
    }

    /// Watch channel which receives a value once the delivery worker ended
    ///
    /// Useful for supervisors that want to shut down when a listener can no longer receive anything,
    /// e.g. because the connection could not be re-established.
    pub fn exit_signal(&self) -> watch::Receiver<Option<WorkerExit>> {
        self.exit_rx.clone()
    }

    /// Subscribes to the subject and starts dispatching envelopes
    ///
    /// Calling this on a subscribed listener does nothing, calling it on a closed one is a [`LifecycleError`].
    /// A listener whose delivery worker ended on its own subscribes again.
    #[instrument(skip(self), fields(subject = %self.subject, group = %self.group))]
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        if self.state == ListenerState::Subscribed && self.worker_exited() {
            self.reap_worker().await;
        }

        match self.state {
            ListenerState::Subscribed => {
                debug!("Listener is already subscribed");
                return Ok(());
            }
            ListenerState::Closed => return Err(LifecycleError::Closed.into()),
            ListenerState::Unbound => {}
        }

        match self.transport.status() {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Reconnecting => return Err(TransportError::NotConnected.into()),
            ConnectionStatus::Closed => return Err(TransportError::Closed.into()),
        }

        let subscription = self
            .transport
            .subscribe(&self.subject, &self.durable, &self.policy)
            .await?;

        let (id, deliveries) = subscription.into_parts();
        if let Ok(mut active) = self.active.lock() {
            *active = Some(id);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            dispatcher: Arc::new(Dispatcher {
                transport: self.transport.clone(),
                subject: self.subject.clone(),
                group: self.group.clone(),
                dead_letter: self.dead_letter.clone(),
                max_deliveries: self.policy.max_deliveries(),
                decoder: self.decoder.clone(),
                handler: self.handler.clone(),
            }),
            durable: self.durable.clone(),
            policy: self.policy.clone(),
            active: self.active.clone(),
            shutdown: shutdown_rx,
        };

        let exit_tx = self.exit_tx.clone();
        let join = tokio::spawn(async move {
            let exit = worker.run(deliveries).await;
            exit_tx.send(Some(exit)).ok();
            exit
        });

        self.worker = Some(WorkerHandle {
            shutdown: shutdown_tx,
            join,
        });
        self.state = ListenerState::Subscribed;

        info!(subscription = %id, durable = %self.durable, "Listener subscribed");

        Ok(())
    }

    /// Stops dispatching and releases the subscription
    ///
    /// An envelope that is currently being processed is not interrupted, this function returns once its handler
    /// finished or the ack wait window of the policy elapsed, whatever comes first. Envelopes delivered but not
    /// yet dispatched are handed back to the broker. Calling this multiple times is harmless.
    #[instrument(skip(self), fields(subject = %self.subject, group = %self.group))]
    pub async fn stop(&mut self) {
        if self.state == ListenerState::Closed {
            return;
        }

        self.state = ListenerState::Closed;

        if let Some(worker) = self.worker.take() {
            worker.shutdown.send(true).ok();

            match timeout(self.policy.ack_wait(), worker.join).await {
                Ok(Ok(exit)) => debug!(?exit, "Delivery worker exited"),
                Ok(Err(error)) => error!(?error, "Delivery worker panicked"),
                Err(_) => warn!("In-flight dispatch did not finish within the ack wait window"),
            }
        }

        let active = self.active.lock().ok().and_then(|mut active| active.take());

        if let Some(id) = active {
            if self.transport.status() == ConnectionStatus::Connected {
                if let Err(error) = self.transport.unsubscribe(id).await {
                    warn!(subscription = %id, ?error, "Failed to unsubscribe");
                }
            }
        }

        info!("Listener closed");
    }
}

impl<T, E, H> Listener<T, JsonDecoder<E>, H>
where
    T: Transport,
    E: Event,
    H: Handler<Event = E> + 'static,
{
    /// Creates a listener for a typed [`Event`] using its subject and a JSON decoder
    pub fn for_event(
        transport: Arc<T>,
        group: impl Into<String>,
        policy: SubscriptionPolicy,
        handler: H,
    ) -> Result<Self, ConfigurationError> {
        Self::bind(
            transport,
            E::SUBJECT,
            group,
            policy,
            JsonDecoder::default(),
            handler,
        )
    }
}

#[cfg(test)]
mod does;
