//! Structures to keep the process alive until some event occurs

use futures::{
    channel::mpsc::{channel, Receiver, Sender},
    pin_mut,
    prelude::*,
    select,
};
use std::{
    fmt,
    fmt::{Error as FmtError, Formatter},
};
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tracing::{debug, error, warn};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// SIGINT, SIGTERM or other process-external cause
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, w: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            DeathReason::Killed(reason) => write!(w, "Killed ({})", reason),
            DeathReason::Terminated => write!(w, "Terminated due to external signal"),
        }
    }
}

/// Lifecycle management struct that can be used to keep the application alive
pub struct Heart {
    /// Receiver for kill requests sent by heart stones
    rx: Receiver<String>,
}

impl Heart {
    /// Creates a new heart and linked stone
    pub fn new() -> (Self, HeartStone) {
        let (tx, rx) = channel(2);
        (Self { rx }, HeartStone::new(tx))
    }

    /// Future that waits until the heart dies for the returned reason
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");

        let termination = Heart::termination_signal().fuse();
        pin_mut!(termination);

        select! {
            reason = self.rx.next() => {
                if let Some(reason) = reason {
                    return DeathReason::Killed(reason);
                }
            },
            () = termination => return DeathReason::Terminated,
        };

        debug!("All heart stones have been dropped");
        termination.await;

        DeathReason::Terminated
    }

    async fn termination_signal() {
        let ctrl_c = ctrl_c().fuse();
        pin_mut!(ctrl_c);

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm_stream) => {
                let sigterm = sigterm_stream.recv().fuse();
                pin_mut!(sigterm);

                select! {
                    _ = sigterm => {},
                    _ = ctrl_c => {},
                };
            }
            Err(error) => {
                warn!(?error, "Unable to listen for SIGTERM, only reacting to SIGINT");
                ctrl_c.await.ok();
            }
        }
    }
}

/// Remote controller for the heart
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    fn new(remote: Sender<String>) -> Self {
        Self { remote }
    }

    /// Kill the associated heart
    pub async fn kill(&mut self, reason: String) {
        if let Err(e) = self.remote.send(reason).await {
            error!("Failed to interact with Heart: {}", e);
        }
    }
}
