//! Durable consumer printing every created ticket
//!
//! The module joins the configured durable group, logs each received `ticket:created` event and acknowledges it.
//! Multiple instances sharing the group split the messages between them. Once the delivery worker of the
//! listener ends for a reason other than a regular shutdown, the module terminates so that a supervisor
//! can restart it.

use crate::domain::event::TicketCreatedEvent;
use crate::domain::TicketCreatedLogger;
use crate::harness::{Heart, HeartStone, Module, ModuleTerminationReason};
use crate::library::communication::event::{Listener, Transport, WorkerExit};
use crate::library::communication::implementation::json::JsonDecoder;
use crate::library::communication::ListenerError;
use crate::library::{BoxedError, EmptyResult};
use crate::module::connection::{connect, startup_backoff};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

mod options;

pub use options::Options;

type TicketListener<T> = Listener<T, JsonDecoder<TicketCreatedEvent>, TicketCreatedLogger>;

#[derive(Debug, Error)]
enum ListenModuleError {
    #[error("listener has not been started")]
    NotStarted,
}

/// Module implementation
pub struct Listen<T: Transport> {
    options: Options,
    transport: Option<Arc<T>>,
    listener: Option<TicketListener<T>>,
}

impl<T: Transport> Listen<T> {
    /// Creates a new instance which connects to the broker on startup
    pub fn new(options: Options) -> Self {
        Self {
            options,
            transport: None,
            listener: None,
        }
    }

    /// Creates a new instance using an already connected transport
    pub fn with_transport(options: Options, transport: Arc<T>) -> Self {
        Self {
            options,
            transport: Some(transport),
            listener: None,
        }
    }

    async fn transport(&mut self) -> Result<Arc<T>, BoxedError> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }

        let connect_options = self.options.transport.connect_options();
        let transport = Arc::new(connect::<T>(&connect_options).await?);
        self.transport = Some(transport.clone());

        Ok(transport)
    }
}

#[async_trait]
impl<T: Transport> Module for Listen<T> {
    async fn pre_startup(&mut self) -> EmptyResult {
        let transport = self.transport().await?;
        let subscription = &self.options.subscription;

        let mut listener = Listener::bind(
            transport,
            subscription.subject.clone(),
            subscription.group.clone(),
            subscription.policy()?,
            JsonDecoder::default(),
            TicketCreatedLogger,
        )?;

        start(&mut listener).await?;
        self.listener = Some(listener);

        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(ListenModuleError::NotStarted)?;

        let (heart, stone) = Heart::new();
        tokio::spawn(watch_worker(listener.exit_signal(), stone));

        Ok(Some(heart))
    }

    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop().await;
        }

        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }

        info!(%termination_reason, "Listen module shut down");
    }
}

/// Starts the listener, retrying while the broker is temporarily unavailable
async fn start<T: Transport>(listener: &mut TicketListener<T>) -> Result<(), ListenerError> {
    let mut backoff = startup_backoff();

    loop {
        match listener.start().await {
            Ok(()) => return Ok(()),
            Err(error) if !error.is_fatal() => match backoff.next() {
                Some(delay) => {
                    warn!(?error, ?delay, "Unable to start listener, retrying");
                    sleep(delay).await;
                }
                None => return Err(error),
            },
            Err(error) => return Err(error),
        }
    }
}

/// Kills the heart once the delivery worker ended for any reason but a regular shutdown
async fn watch_worker(mut exit: watch::Receiver<Option<WorkerExit>>, mut stone: HeartStone) {
    loop {
        let reason = *exit.borrow();

        if let Some(reason) = reason {
            if reason != WorkerExit::Stopped {
                stone
                    .kill(format!("delivery worker exited ({:?})", reason))
                    .await;
                return;
            }
        }

        if exit.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::harness::DeathReason;
    use crate::library::communication::event::{ConnectionStatus, EventPublisher};
    use crate::library::communication::implementation::memory::InMemoryBroker;
    use crate::library::communication::ConfigurationError;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use structopt::StructOpt;

    const SUBJECT: &str = "ticket:created";
    const GROUP: &str = "orders-service-queue-group";

    fn options(args: &[&str]) -> Options {
        Options::from_iter_safe(std::iter::once("listen").chain(args.iter().copied())).unwrap()
    }

    fn ticket() -> TicketCreatedEvent {
        TicketCreatedEvent {
            id: "abc".into(),
            title: "concert".into(),
            price: 20.0,
            user_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consume_history_of_injected_transport() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.publish_event(&ticket()).await.unwrap();

        let mut module = Listen::with_transport(options(&[]), broker.clone());
        module.pre_startup().await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);

        module
            .post_shutdown(&ModuleTerminationReason::ExitedNormally)
            .await;

        assert_eq!(broker.member_count(SUBJECT, GROUP), 0);
        assert_eq!(broker.status(), ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn refuse_invalid_policies() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut module = Listen::with_transport(options(&["--ack-wait-ms", "10"]), broker);

        let error = module.pre_startup().await.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::AckWaitTooShort { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_broker_during_startup() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.disconnect();

        let reconnecting = broker.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            reconnecting.reconnect();
        });

        let mut module = Listen::with_transport(options(&[]), broker.clone());
        module.pre_startup().await.unwrap();

        assert_eq!(broker.member_count(SUBJECT, GROUP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn die_when_transport_closes() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut module = Listen::with_transport(options(&[]), broker.clone());

        module.pre_startup().await.unwrap();
        let mut heart = module.run().await.unwrap().unwrap();

        broker.close().await;

        assert!(matches!(heart.death().await, DeathReason::Killed(_)));
    }

    #[tokio::test]
    async fn refuse_to_run_without_startup() {
        let mut module = Listen::<InMemoryBroker>::new(options(&[]));
        assert!(module.run().await.is_err());
    }
}
