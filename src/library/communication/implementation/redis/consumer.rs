use super::super::super::event::DeliveryStream;
use super::super::super::TransportError;
use super::envelope::{RedisEnvelope, StreamEntry};
use super::health::Health;
use super::STREAM_ID_ADDITIONS;
use futures::stream::{self, StreamExt};
use redis::aio::{Connection, ConnectionManager};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Cmd, RedisResult};
use std::collections::VecDeque;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const READ_BLOCK_MAXIMUM: Duration = Duration::from_secs(1);
const CLAIM_BATCH_SIZE: usize = 32;

/// Everything a single consumer of a stream consumer group needs
pub(super) struct Consumer {
    /// Dedicated connection for the blocking `XREADGROUP` command
    pub reader: Connection,
    /// Shared connection used for acknowledgments and claims
    pub shared: ConnectionManager,
    pub health: Arc<Health>,
    pub key: String,
    pub group: String,
    pub name: String,
    pub ack_wait: Duration,
    pub cancelled: Arc<AtomicBool>,
}

struct ConsumerState {
    consumer: Consumer,
    buffer: VecDeque<(StreamId, u32)>,
    last_claim: Option<Instant>,
    failed: bool,
}

impl Consumer {
    /// Converts the consumer into a lazy stream of envelopes
    ///
    /// 1. Claim entries of the group which have been pending for longer than the ack wait window
    /// 2. Wait for new entries in a blocking manner, but never longer than the claim interval
    /// 3. End the stream after the first redis error or when the subscription got cancelled
    pub fn into_stream(self) -> DeliveryStream<RedisEnvelope> {
        let state = ConsumerState {
            consumer: self,
            buffer: VecDeque::new(),
            last_claim: None,
            failed: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.failed || state.consumer.cancelled.load(Ordering::SeqCst) {
                    return None;
                }

                if let Some((entry, delivery_count)) = state.buffer.pop_front() {
                    let item = state.consumer.envelope(entry, delivery_count).await;
                    return Some((item, state));
                }

                let claim_due = state
                    .last_claim
                    .map(|at| at.elapsed() >= state.consumer.claim_interval())
                    .unwrap_or(true);

                let result = if claim_due {
                    state.last_claim = Some(Instant::now());
                    state.consumer.claim_idle().await
                } else {
                    state.consumer.read_additions().await
                };

                match result {
                    Ok(entries) => state.buffer.extend(entries),
                    Err(error) => {
                        warn!(key = %state.consumer.key, ?error, "Failed to read from redis stream");
                        state.failed = true;

                        let error = state.consumer.health.fail(&state.consumer.shared, error);
                        return Some((Err(error), state));
                    }
                }
            }
        })
        .boxed()
    }

    fn claim_interval(&self) -> Duration {
        (self.ack_wait / 2).min(READ_BLOCK_MAXIMUM)
    }

    async fn envelope(
        &mut self,
        entry: StreamId,
        delivery_count: u32,
    ) -> Result<RedisEnvelope, TransportError> {
        match StreamEntry::parse(&entry) {
            Ok(parsed) => Ok(RedisEnvelope::new(
                self.shared.clone(),
                parsed,
                self.key.clone(),
                self.group.clone(),
                delivery_count,
            )),
            Err(reason) => {
                // Entries without the expected fields never become decodable, drop them from the pending list
                if let Err(error) = self
                    .shared
                    .xack::<_, _, _, ()>(&self.key, &self.group, &[&entry.id])
                    .await
                {
                    debug!(id = %entry.id, ?error, "Failed to discard malformed entry");
                }

                Err(TransportError::MalformedEnvelope(reason))
            }
        }
    }

    async fn read_additions(&mut self) -> RedisResult<Vec<(StreamId, u32)>> {
        let block = u64::try_from(self.claim_interval().as_millis()).unwrap_or(u64::MAX);
        let options = StreamReadOptions::default()
            .group(&self.group, &self.name)
            .count(1)
            .block(block as usize);

        let reply: Option<StreamReadReply> = self
            .reader
            .xread_options(&[&self.key], &[STREAM_ID_ADDITIONS], &options)
            .await?;

        let entries = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|stream| stream.ids)
            .map(|entry| (entry, 1))
            .collect();

        Ok(entries)
    }

    async fn claim_idle(&mut self) -> RedisResult<Vec<(StreamId, u32)>> {
        let min_idle = u64::try_from(self.ack_wait.as_millis()).unwrap_or(u64::MAX);

        let pending: StreamPendingCountReply = pending_idle(&self.key, &self.group, min_idle)
            .query_async(&mut self.shared)
            .await?;

        let idle: Vec<(String, u32)> = pending
            .ids
            .into_iter()
            .map(|entry| (entry.id, entry.times_delivered as u32))
            .collect();

        if idle.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = idle.iter().map(|(id, _)| id.as_str()).collect();
        let claimed: StreamClaimReply = self
            .shared
            .xclaim(&self.key, &self.group, &self.name, min_idle, &ids[..])
            .await?;

        trace!(key = %self.key, count = claimed.ids.len(), "Claimed idle entries");

        let entries = claimed
            .ids
            .into_iter()
            .map(|entry| {
                let previous = idle
                    .iter()
                    .find(|(id, _)| *id == entry.id)
                    .map(|(_, count)| *count)
                    .unwrap_or_default();

                (entry, previous + 1)
            })
            .collect();

        Ok(entries)
    }
}

/// Lists the oldest pending entries of the group which have been idle for at least `min_idle` milliseconds
///
/// Filtering happens on the server so that entries busy with live members never hide idle ones further down.
fn pending_idle(key: &str, group: &str, min_idle: u64) -> Cmd {
    let mut cmd = redis::cmd("XPENDING");
    cmd.arg(key)
        .arg(group)
        .arg("IDLE")
        .arg(min_idle)
        .arg("-")
        .arg("+")
        .arg(CLAIM_BATCH_SIZE);
    cmd
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn filter_pending_entries_by_idle_time() {
        let packed = pending_idle("ticketing.ticket:created", "orders", 5000).get_packed_command();
        let packed = String::from_utf8(packed).unwrap();

        let arguments: Vec<&str> = packed
            .split("\r\n")
            .filter(|line| !line.is_empty() && !line.starts_with('*') && !line.starts_with('$'))
            .collect();

        assert_eq!(
            arguments,
            vec!["XPENDING", "ticketing.ticket:created", "orders", "IDLE", "5000", "-", "+", "32"]
        );
    }
}
