//! Helpers to establish broker connections during module startup

use crate::library::communication::event::{ConnectOptions, Transport};
use crate::library::communication::TransportError;
use crate::library::helpers::Backoff;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// Backoff used while the broker is not reachable during startup
pub fn startup_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(100), 8).with_ceiling(Duration::from_secs(10))
}

/// Connects to the broker, retrying with exponential backoff until the attempts are exhausted
#[instrument(skip(options), fields(cluster = %options.cluster_id, client = %options.client_id))]
pub async fn connect<T: Transport>(options: &ConnectOptions) -> Result<T, TransportError> {
    let mut backoff = startup_backoff();

    loop {
        match T::connect(options).await {
            Ok(transport) => {
                info!("Connected to broker");
                return Ok(transport);
            }
            Err(TransportError::Closed) => return Err(TransportError::Closed),
            Err(error) => match backoff.next() {
                Some(delay) => {
                    warn!(?error, ?delay, "Unable to connect to broker, retrying");
                    sleep(delay).await;
                }
                None => return Err(error),
            },
        }
    }
}
