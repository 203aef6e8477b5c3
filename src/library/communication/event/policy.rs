use super::super::ConfigurationError;
use super::Subject;
use std::time::Duration;

/// Acknowledgment window used unless configured otherwise
pub const DEFAULT_ACK_WAIT_MS: i64 = 5000;

/// Shortest acknowledgment window accepted
///
/// Shorter windows make the broker redeliver messages while slow handlers are still working on them.
pub const MINIMUM_ACK_WAIT_MS: u64 = 1000;

/// Rules governing how a listener attaches to a subject
///
/// Instances can only be obtained through the [`SubscriptionPolicyBuilder`] (or [`Default`]) and are thus always valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPolicy {
    manual_ack: bool,
    replay_all: bool,
    durable_name: Option<String>,
    ack_wait: Duration,
    max_in_flight: usize,
    max_deliveries: Option<u32>,
    dead_letter_subject: Option<Subject>,
    max_reconnect_attempts: Option<u32>,
}

impl SubscriptionPolicy {
    /// Creates a builder with the default options
    pub fn builder() -> SubscriptionPolicyBuilder {
        SubscriptionPolicyBuilder::default()
    }

    /// Whether the broker waits for explicit acknowledgments before advancing the cursor
    pub fn manual_ack(&self) -> bool {
        self.manual_ack
    }

    /// Whether a newly created group starts at the very first message of the subject instead of only receiving new ones
    pub fn replay_all(&self) -> bool {
        self.replay_all
    }

    /// Explicitly configured durable name, listeners fall back to their group name when this is `None`
    pub fn durable_name(&self) -> Option<&str> {
        self.durable_name.as_deref()
    }

    /// Time the broker waits for an acknowledgment before offering the message to another group member
    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    /// Maximum number of unacknowledged envelopes per listener
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Number of failed deliveries after which a message is dead lettered, `None` redelivers indefinitely
    pub fn max_deliveries(&self) -> Option<u32> {
        self.max_deliveries
    }

    /// Explicitly configured dead letter subject
    pub fn dead_letter_subject(&self) -> Option<&Subject> {
        self.dead_letter_subject.as_ref()
    }

    /// Number of re-subscribe attempts after the subscription ended before the listener gives up,
    /// `None` keeps trying for as long as the transport is not closed
    pub fn max_reconnect_attempts(&self) -> Option<u32> {
        self.max_reconnect_attempts
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.manual_ack {
            return Err(ConfigurationError::ManualAckRequired);
        }

        if self.ack_wait.is_zero() {
            return Err(ConfigurationError::AckWaitNotPositive(0));
        }

        if self.max_in_flight == 0 {
            return Err(ConfigurationError::NoneInFlight);
        }

        if self.max_reconnect_attempts == Some(0) {
            return Err(ConfigurationError::NoReconnectAttempts);
        }

        if let Some(name) = &self.durable_name {
            if name.trim().is_empty() {
                return Err(ConfigurationError::EmptyDurableName);
            }
        }

        Ok(())
    }
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            manual_ack: true,
            replay_all: true,
            durable_name: None,
            ack_wait: Duration::from_millis(DEFAULT_ACK_WAIT_MS as u64),
            max_in_flight: 1,
            max_deliveries: None,
            dead_letter_subject: None,
            max_reconnect_attempts: None,
        }
    }
}

/// Constructs and validates [`SubscriptionPolicies`](SubscriptionPolicy)
#[derive(Debug, Clone)]
pub struct SubscriptionPolicyBuilder {
    manual_ack: bool,
    replay_all: bool,
    durable_name: Option<String>,
    ack_wait_ms: i64,
    max_in_flight: usize,
    max_deliveries: Option<u32>,
    dead_letter_subject: Option<String>,
    max_reconnect_attempts: Option<u32>,
}

impl Default for SubscriptionPolicyBuilder {
    fn default() -> Self {
        Self {
            manual_ack: true,
            replay_all: true,
            durable_name: None,
            ack_wait_ms: DEFAULT_ACK_WAIT_MS,
            max_in_flight: 1,
            max_deliveries: None,
            dead_letter_subject: None,
            max_reconnect_attempts: None,
        }
    }
}

impl SubscriptionPolicyBuilder {
    /// Sets the acknowledgment mode. Only manual acknowledgment is supported, `false` is rejected by [`build`](Self::build).
    pub fn manual_ack(mut self, manual_ack: bool) -> Self {
        self.manual_ack = manual_ack;
        self
    }

    /// Sets whether new groups replay the whole subject history
    pub fn replay_all(mut self, replay_all: bool) -> Self {
        self.replay_all = replay_all;
        self
    }

    /// Overrides the durable name which defaults to the group name of the listener
    pub fn durable_name(mut self, name: impl Into<String>) -> Self {
        self.durable_name = Some(name.into());
        self
    }

    /// Sets the acknowledgment window in milliseconds
    pub fn ack_wait_ms(mut self, ack_wait_ms: i64) -> Self {
        self.ack_wait_ms = ack_wait_ms;
        self
    }

    /// Sets the maximum number of concurrently processed envelopes. Anything above one opts into fan-out
    /// and gives up the per-listener ordering of handler side effects.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Dead letters messages which failed to be processed on their `max_deliveries`th delivery
    pub fn max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    /// Overrides the dead letter subject which defaults to the subject of the listener suffixed with `:dead-letter`
    pub fn dead_letter_subject(mut self, subject: impl Into<String>) -> Self {
        self.dead_letter_subject = Some(subject.into());
        self
    }

    /// Limits how often a listener tries to re-subscribe after losing its subscription.
    /// Without a limit it waits for the transport to come back indefinitely.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Validates the options and builds the policy
    pub fn build(self) -> Result<SubscriptionPolicy, ConfigurationError> {
        if !self.manual_ack {
            return Err(ConfigurationError::ManualAckRequired);
        }

        if self.ack_wait_ms <= 0 {
            return Err(ConfigurationError::AckWaitNotPositive(self.ack_wait_ms));
        }

        if (self.ack_wait_ms as u64) < MINIMUM_ACK_WAIT_MS {
            return Err(ConfigurationError::AckWaitTooShort {
                ack_wait_ms: self.ack_wait_ms,
                minimum_ms: MINIMUM_ACK_WAIT_MS,
            });
        }

        if self.max_in_flight == 0 {
            return Err(ConfigurationError::NoneInFlight);
        }

        if self.max_deliveries == Some(0) {
            return Err(ConfigurationError::NoDeliveries);
        }

        if self.max_reconnect_attempts == Some(0) {
            return Err(ConfigurationError::NoReconnectAttempts);
        }

        if let Some(name) = &self.durable_name {
            if name.trim().is_empty() {
                return Err(ConfigurationError::EmptyDurableName);
            }
        }

        let dead_letter_subject = self.dead_letter_subject.map(Subject::new).transpose()?;

        Ok(SubscriptionPolicy {
            manual_ack: self.manual_ack,
            replay_all: self.replay_all,
            durable_name: self.durable_name,
            ack_wait: Duration::from_millis(self.ack_wait_ms as u64),
            max_in_flight: self.max_in_flight,
            max_deliveries: self.max_deliveries,
            dead_letter_subject,
            max_reconnect_attempts: self.max_reconnect_attempts,
        })
    }
}
