use super::super::super::event::ConnectionStatus;
use super::super::super::TransportError;
use super::{backend, is_unreachable};
use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

const RECOVERY_INTERVAL: Duration = Duration::from_secs(2);
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(4);

/// Tracks whether redis is reachable and brings the shared connection back after it dropped
///
/// Commands report their results through [`observe`](Health::observe). The first one failing because the
/// server can not be reached flips the status to [`ConnectionStatus::Reconnecting`] and starts a background
/// task which pings redis through the [`ConnectionManager`] until it answers again.
#[derive(Debug)]
pub(super) struct Health {
    reachable: AtomicBool,
    closed: AtomicBool,
}

impl Health {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.closed.load(Ordering::SeqCst) {
            ConnectionStatus::Closed
        } else if self.reachable.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Reconnecting
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the transport as closed, returns whether it has been open before
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Returns whether this call caused the transition
    fn mark_unreachable(&self) -> bool {
        self.reachable.swap(false, Ordering::SeqCst)
    }

    fn mark_reachable(&self) -> bool {
        !self.reachable.swap(true, Ordering::SeqCst)
    }

    /// Converts the result of a redis command, starting the recovery when the server became unreachable
    pub fn observe<T>(
        self: &Arc<Self>,
        con: &ConnectionManager,
        result: RedisResult<T>,
    ) -> Result<T, TransportError> {
        result.map_err(|error| self.fail(con, error))
    }

    /// Converts a failed redis command, starting the recovery when the server became unreachable
    pub fn fail(self: &Arc<Self>, con: &ConnectionManager, error: RedisError) -> TransportError {
        if is_unreachable(&error) && self.mark_unreachable() {
            warn!(?error, "Lost connection to redis");
            tokio::spawn(self.clone().recover(con.clone()));
        }

        backend(error)
    }

    #[instrument(skip(self, con))]
    async fn recover(self: Arc<Self>, mut con: ConnectionManager) {
        let mut attempt = 0;

        loop {
            sleep(RECOVERY_INTERVAL).await;
            attempt += 1;

            if self.is_closed() {
                return;
            }

            let ping_cmd = redis::cmd("PING");
            let ping = ping_cmd.query_async::<_, ()>(&mut con);

            match timeout(RECOVERY_TIMEOUT, ping).await {
                Ok(Ok(())) => {
                    if self.mark_reachable() {
                        info!(attempt, "Connection to redis re-established");
                    }
                    return;
                }
                Ok(Err(error)) => debug!(attempt, ?error, "Redis is still unreachable"),
                Err(_) => debug!(attempt, "Timeout while waiting for redis"),
            }
        }
    }
}
