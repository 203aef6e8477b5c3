use super::event::TicketCreatedEvent;
use crate::library::communication::event::{Delivery, Handler};
use crate::library::EmptyResult;
use async_trait::async_trait;
use tracing::info;

/// Handler printing every created ticket
///
/// Serves as a reference consumer of the `ticket:created` subject and as a debugging tool to
/// observe what is being published.
#[derive(Debug, Default, Clone)]
pub struct TicketCreatedLogger;

#[async_trait]
impl Handler for TicketCreatedLogger {
    type Event = TicketCreatedEvent;

    async fn handle(&self, event: TicketCreatedEvent, delivery: &Delivery) -> EmptyResult {
        let data = serde_json::to_string_pretty(&event)?;

        info!(
            sequence = delivery.sequence,
            redelivered = delivery.redelivered(),
            "Received event #{}, with data: {}",
            delivery.sequence,
            data
        );

        Ok(())
    }
}
