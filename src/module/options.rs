//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use crate::library::communication::event::{ConnectOptions, SubscriptionPolicy};
use crate::library::communication::ConfigurationError;
use structopt::StructOpt;

/// Options for connecting to the message broker
#[derive(Debug, StructOpt)]
pub struct TransportOptions {
    /// Identifier of the broker cluster.
    /// All services of one system have to use the same value.
    #[structopt(long, env, default_value = "ticketing", value_name = "id")]
    pub cluster_id: String,

    /// Identifier of this client, a random one is generated when omitted.
    /// It has to be unique among all connected clients.
    #[structopt(long, env, value_name = "id")]
    pub client_id: Option<String>,

    /// Redis database server URL
    #[structopt(
        short = "r",
        long = "redis",
        env = "REDIS",
        default_value = "redis://localhost:6379/",
        value_name = "url"
    )]
    pub endpoint: String,
}

impl TransportOptions {
    /// Assembles the connection parameters, generating a random client identifier if none was given
    pub fn connect_options(&self) -> ConnectOptions {
        let client_id = match &self.client_id {
            Some(id) => id.clone(),
            None => random_client_id(),
        };

        ConnectOptions {
            cluster_id: self.cluster_id.clone(),
            client_id,
            endpoint: self.endpoint.clone(),
        }
    }
}

fn random_client_id() -> String {
    rand::random::<[u8; 4]>()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Options controlling how a listener subscribes
#[derive(Debug, StructOpt)]
pub struct SubscriptionOptions {
    /// Subject to consume
    #[structopt(long, env, default_value = "ticket:created", value_name = "subject")]
    pub subject: String,

    /// Durable group to join.
    /// All instances of one service use the same group and share its messages.
    #[structopt(
        long,
        env,
        default_value = "orders-service-queue-group",
        value_name = "group"
    )]
    pub group: String,

    /// Name under which the broker persists the progress of the group, defaults to the group
    #[structopt(long, env, value_name = "name")]
    pub durable_name: Option<String>,

    /// Milliseconds the broker waits for an acknowledgment before redelivering a message
    #[structopt(long, env, default_value = "5000", value_name = "ms")]
    pub ack_wait_ms: i64,

    /// Only receive messages published after the group has been created
    /// instead of replaying the whole history
    #[structopt(long)]
    pub new_only: bool,

    /// Number of deliveries after which a failing message is moved to the dead letter subject.
    /// Failing messages are redelivered indefinitely when omitted.
    #[structopt(long, env, value_name = "count")]
    pub max_deliveries: Option<u32>,

    /// Subject failing messages are moved to, defaults to `<subject>:dead-letter`
    #[structopt(long, env, value_name = "subject")]
    pub dead_letter_subject: Option<String>,

    /// Number of messages processed concurrently
    #[structopt(long, env, default_value = "1", value_name = "count")]
    pub max_in_flight: usize,

    /// Number of attempts to re-subscribe after the connection was lost.
    /// The listener waits for the broker indefinitely when omitted.
    #[structopt(long, env, value_name = "count")]
    pub max_reconnect_attempts: Option<u32>,
}

impl SubscriptionOptions {
    /// Validates the options and converts them into a policy
    pub fn policy(&self) -> Result<SubscriptionPolicy, ConfigurationError> {
        let mut builder = SubscriptionPolicy::builder()
            .ack_wait_ms(self.ack_wait_ms)
            .replay_all(!self.new_only)
            .max_in_flight(self.max_in_flight);

        if let Some(name) = &self.durable_name {
            builder = builder.durable_name(name);
        }

        if let Some(max_deliveries) = self.max_deliveries {
            builder = builder.max_deliveries(max_deliveries);
        }

        if let Some(subject) = &self.dead_letter_subject {
            builder = builder.dead_letter_subject(subject);
        }

        if let Some(attempts) = self.max_reconnect_attempts {
            builder = builder.max_reconnect_attempts(attempts);
        }

        builder.build()
    }
}
