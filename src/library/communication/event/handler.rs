use super::Delivery;
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Business logic invoked for every decoded event
///
/// Returning an error leaves the envelope unacknowledged so that it will be redelivered once the
/// ack wait window elapses. Since delivery is at-least-once, implementations have to be idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Event type consumed
    type Event: Send + 'static;

    /// Processes an event and returns whether it succeeded or failed
    async fn handle(&self, event: Self::Event, delivery: &Delivery) -> EmptyResult;
}

/// [`Handler`] backed by an async function or closure, created with [`handler_fn`]
pub struct HandlerFn<F, E> {
    function: F,
    event: PhantomData<fn(E)>,
}

/// Wraps a function taking the event and its [`Delivery`] metadata into a [`Handler`]
///
/// ```ignore
/// let handler = handler_fn(|event: TicketCreatedEvent, delivery| async move {
///     info!(sequence = delivery.sequence, id = %event.id, "Ticket created");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut, E>(function: F) -> HandlerFn<F, E>
where
    F: Fn(E, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = EmptyResult> + Send,
    E: Send + 'static,
{
    HandlerFn {
        function,
        event: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, E> Handler for HandlerFn<F, E>
where
    F: Fn(E, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = EmptyResult> + Send,
    E: Send + 'static,
{
    type Event = E;

    async fn handle(&self, event: E, delivery: &Delivery) -> EmptyResult {
        (self.function)(event, delivery.clone()).await
    }
}
