//! One-shot publisher of `ticket:created` or `ticket:updated` events
//!
//! Mostly useful to exercise listeners during development.

use crate::domain::event::{TicketCreatedEvent, TicketUpdatedEvent};
use crate::harness::{Heart, Module, ModuleTerminationReason};
use crate::library::communication::event::{Event, EventPublisher, Transport};
use crate::library::{BoxedError, EmptyResult};
use crate::module::connection::connect;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

mod options;

pub use options::Options;

#[derive(Debug, Error)]
enum PublishModuleError {
    #[error("transport has not been connected")]
    NotConnected,
}

/// Module implementation
pub struct Publish<T: Transport> {
    options: Options,
    transport: Option<Arc<T>>,
    published: Vec<u64>,
}

impl<T: Transport> Publish<T> {
    /// Creates a new instance which connects to the broker on startup
    pub fn new(options: Options) -> Self {
        Self {
            options,
            transport: None,
            published: Vec::new(),
        }
    }

    /// Creates a new instance using an already connected transport
    pub fn with_transport(options: Options, transport: Arc<T>) -> Self {
        Self {
            options,
            transport: Some(transport),
            published: Vec::new(),
        }
    }

    /// Sequence numbers the broker assigned to the published events
    pub fn published(&self) -> &[u64] {
        &self.published
    }

    fn ticket_id(&self) -> String {
        self.options.id.clone().unwrap_or_else(random_ticket_id)
    }

    fn created(&self, id: String) -> TicketCreatedEvent {
        TicketCreatedEvent {
            id,
            title: self.options.title.clone(),
            price: self.options.price,
            user_id: self.options.user_id.clone(),
        }
    }

    fn updated(&self, id: String) -> TicketUpdatedEvent {
        TicketUpdatedEvent {
            id,
            title: self.options.title.clone(),
            price: self.options.price,
            user_id: self.options.user_id.clone(),
        }
    }
}

fn random_ticket_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[async_trait]
impl<T: Transport> Module for Publish<T> {
    async fn pre_startup(&mut self) -> EmptyResult {
        if self.transport.is_none() {
            let connect_options = self.options.transport.connect_options();
            self.transport = Some(Arc::new(connect::<T>(&connect_options).await?));
        }

        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let transport = self
            .transport
            .clone()
            .ok_or(PublishModuleError::NotConnected)?;

        for _ in 0..self.options.count {
            let id = self.ticket_id();

            let (subject, sequence) = if self.options.update {
                let event = self.updated(id.clone());
                (TicketUpdatedEvent::SUBJECT, transport.publish_event(&event).await?)
            } else {
                let event = self.created(id.clone());
                (TicketCreatedEvent::SUBJECT, transport.publish_event(&event).await?)
            };

            info!(sequence, %id, subject, "Published event");
            self.published.push(sequence);
        }

        Ok(None)
    }

    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }

        debug!(%termination_reason, published = self.published.len(), "Publish module shut down");
    }
}
