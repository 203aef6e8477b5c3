use super::super::super::event::{
    ConnectOptions, ConnectionStatus, DurableGroup, Payload, Subject, Subscription,
    SubscriptionId, SubscriptionPolicy, Transport,
};
use super::super::super::TransportError;
use super::consumer::Consumer;
use super::health::Health;
use super::{backend, sequence_key, stream_key, RedisEnvelope, STREAM_ID_HEAD, STREAM_ID_TAIL};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, trace};

const BUSY_GROUP_ERROR_CODE: &str = "BUSYGROUP";

const PUBLISH_SCRIPT: &str = r#"
local sequence = redis.call('INCR', KEYS[2])
redis.call('XADD', KEYS[1], '*', 'sequence', sequence, 'payload', ARGV[1])
return sequence
"#;

/// [`Transport`] implementation using [Redis Streams](https://redis.io/topics/streams-intro)
///
/// Each subscription opens a dedicated connection for blocking reads while publishing, acknowledgments
/// and claims of idle entries are multiplexed over a single shared connection. The shared connection is
/// re-established automatically once redis is reachable again.
pub struct RedisTransport {
    client: Client,
    shared: ConnectionManager,
    health: Arc<Health>,
    namespace: String,
    consumer: String,
    publish_script: Script,
    subscriptions: Mutex<HashMap<SubscriptionId, Arc<AtomicBool>>>,
    next_subscription: AtomicU64,
}

impl RedisTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.health.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn key(&self, subject: &Subject) -> String {
        stream_key(&self.namespace, subject.as_str())
    }

    /// Creates the stream and consumer group unless they already exist
    async fn create_group(
        &self,
        key: &str,
        group: &DurableGroup,
        replay_all: bool,
    ) -> Result<(), TransportError> {
        let start_id = if replay_all {
            STREAM_ID_HEAD
        } else {
            STREAM_ID_TAIL
        };

        let mut con = self.shared.clone();
        let result: Result<(), RedisError> = con
            .xgroup_create_mkstream(key, group.as_str(), start_id)
            .await;

        match result {
            Ok(()) => {
                debug!(key, %group, start_id, "Created consumer group");
                Ok(())
            }
            Err(error) if error.code() == Some(BUSY_GROUP_ERROR_CODE) => Ok(()),
            Err(error) => self.health.observe(&self.shared, Err(error)),
        }
    }

    fn cancel_all(&self) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for (_, cancelled) in subscriptions.drain() {
                cancelled.store(true, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    type Envelope = RedisEnvelope;

    #[instrument(skip(options), fields(cluster = %options.cluster_id, client = %options.client_id))]
    async fn connect(options: &ConnectOptions) -> Result<Self, TransportError> {
        let client = Client::open(options.endpoint.as_str()).map_err(backend)?;
        let shared = ConnectionManager::new(client.clone())
            .await
            .map_err(backend)?;

        info!(endpoint = %options.endpoint, "Connected to redis");

        Ok(Self {
            client,
            shared,
            health: Arc::new(Health::new()),
            namespace: options.cluster_id.clone(),
            consumer: options.client_id.clone(),
            publish_script: Script::new(PUBLISH_SCRIPT),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    fn status(&self) -> ConnectionStatus {
        self.health.status()
    }

    async fn publish(&self, subject: &Subject, payload: Payload) -> Result<u64, TransportError> {
        self.ensure_open()?;

        let key = self.key(subject);
        let mut con = self.shared.clone();

        let result = self
            .publish_script
            .key(&key)
            .key(sequence_key(&key))
            .arg(payload.as_bytes())
            .invoke_async(&mut con)
            .await;
        let sequence: u64 = self.health.observe(&self.shared, result)?;

        trace!(%key, sequence, "Published message");

        Ok(sequence)
    }

    #[instrument(skip(self, policy), fields(subject = %subject, group = %group))]
    async fn subscribe(
        &self,
        subject: &Subject,
        group: &DurableGroup,
        policy: &SubscriptionPolicy,
    ) -> Result<Subscription<Self::Envelope>, TransportError> {
        self.ensure_open()?;

        let key = self.key(subject);
        self.create_group(&key, group, policy.replay_all()).await?;

        let reader = self.client.get_async_connection().await;
        let reader = self.health.observe(&self.shared, reader)?;
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let cancelled = Arc::new(AtomicBool::new(false));

        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.insert(id, cancelled.clone());
        }

        let consumer = Consumer {
            reader,
            shared: self.shared.clone(),
            health: self.health.clone(),
            key,
            group: group.as_str().to_owned(),
            name: self.consumer.clone(),
            ack_wait: policy.ack_wait(),
            cancelled,
        };

        debug!(subscription = %id, consumer = %self.consumer, "Consuming redis stream");

        Ok(Subscription::new(id, consumer.into_stream()))
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError> {
        self.ensure_open()?;

        let cancelled = self
            .subscriptions
            .lock()
            .ok()
            .and_then(|mut subscriptions| subscriptions.remove(&subscription));

        if let Some(cancelled) = cancelled {
            cancelled.store(true, Ordering::SeqCst);
            debug!(%subscription, "Cancelled redis stream consumer");
        }

        Ok(())
    }

    async fn close(&self) {
        if self.health.close() {
            self.cancel_all();
            info!("Closed redis transport");
        }
    }
}
