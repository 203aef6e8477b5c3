use super::MemoryEnvelope;
use crate::library::communication::event::{
    ConnectionStatus, DurableGroup, Payload, Subject, SubscriptionId,
};
use futures::channel::mpsc::UnboundedSender;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub(super) type GroupKey = (String, String);

/// Shared broker internals
pub(super) struct Inner {
    state: Mutex<State>,
    pub wakeup: Notify,
}

impl Inner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            wakeup: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals the delivery loop that something changed
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }
}

/// Record of a single acknowledgment call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Subject of the acknowledged envelope
    pub subject: String,
    /// Durable group that acknowledged it
    pub group: String,
    /// Sequence number of the acknowledged envelope
    pub sequence: u64,
}

pub(super) struct PendingDelivery {
    pub member: SubscriptionId,
    pub deadline: Instant,
}

pub(super) struct Member {
    pub id: SubscriptionId,
    pub sender: UnboundedSender<MemoryEnvelope>,
    pub max_in_flight: usize,
    pub ack_wait: Duration,
}

/// Durable cursor and live members of one group on one subject
#[derive(Default)]
pub(super) struct GroupState {
    /// Index of the next message in the subject log that has never been delivered to the group
    pub cursor: usize,
    pub pending: BTreeMap<u64, PendingDelivery>,
    pub redeliver: BTreeSet<u64>,
    /// Delivery count per sequence, retained after acknowledgment for inspection
    pub deliveries: HashMap<u64, u32>,
    pub members: Vec<Member>,
    pub next_member: usize,
}

impl GroupState {
    fn in_flight(&self, member: SubscriptionId) -> usize {
        self.pending
            .values()
            .filter(|pending| pending.member == member)
            .count()
    }

    /// Picks the next member with spare capacity in round-robin order
    fn next_available_member(&mut self) -> Option<usize> {
        let count = self.members.len();

        for offset in 0..count {
            let index = (self.next_member + offset) % count;
            let member = &self.members[index];

            if self.in_flight(member.id) < member.max_in_flight {
                self.next_member = (index + 1) % count;
                return Some(index);
            }
        }

        None
    }

    fn next_candidate(&self, log: &[(u64, Payload)]) -> Option<u64> {
        self.redeliver
            .iter()
            .next()
            .copied()
            .or_else(|| log.get(self.cursor).map(|(sequence, _)| *sequence))
    }

    fn take_candidate(&mut self, sequence: u64) {
        if !self.redeliver.remove(&sequence) {
            self.cursor += 1;
        }
    }
}

/// Complete broker state, guarded by a single mutex
pub(super) struct State {
    pub status: ConnectionStatus,
    pub logs: HashMap<String, Vec<(u64, Payload)>>,
    pub groups: HashMap<GroupKey, GroupState>,
    pub subscriptions: HashMap<SubscriptionId, GroupKey>,
    pub next_subscription: u64,
    pub acknowledgments: Vec<Acknowledgment>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Connected,
            logs: HashMap::new(),
            groups: HashMap::new(),
            subscriptions: HashMap::new(),
            next_subscription: 0,
            acknowledgments: Vec::new(),
        }
    }
}

impl State {
    pub fn append(&mut self, subject: &Subject, payload: Payload) -> u64 {
        let log = self.logs.entry(subject.as_str().to_owned()).or_default();
        let sequence = log.len() as u64 + 1;
        log.push((sequence, payload));
        sequence
    }

    pub fn join(
        &mut self,
        subject: &Subject,
        group: &DurableGroup,
        replay_all: bool,
        sender: UnboundedSender<MemoryEnvelope>,
        max_in_flight: usize,
        ack_wait: Duration,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        let key = (subject.as_str().to_owned(), group.as_str().to_owned());
        let log_length = self.logs.get(&key.0).map(Vec::len).unwrap_or_default();

        let group_state = self.groups.entry(key.clone()).or_insert_with(|| GroupState {
            cursor: if replay_all { 0 } else { log_length },
            ..Default::default()
        });

        group_state.members.push(Member {
            id,
            sender,
            max_in_flight,
            ack_wait,
        });

        self.subscriptions.insert(id, key);

        id
    }

    pub fn leave(&mut self, id: SubscriptionId) {
        if let Some(key) = self.subscriptions.remove(&id) {
            if let Some(group) = self.groups.get_mut(&key) {
                group.members.retain(|member| member.id != id);
            }
        }
    }

    /// Drops every live member while keeping all durable cursors and pending deliveries
    pub fn drop_members(&mut self) {
        for group in self.groups.values_mut() {
            group.members.clear();
        }

        self.subscriptions.clear();
    }

    pub fn acknowledge(&mut self, key: &GroupKey, sequence: u64) {
        self.acknowledgments.push(Acknowledgment {
            subject: key.0.clone(),
            group: key.1.clone(),
            sequence,
        });

        if let Some(group) = self.groups.get_mut(key) {
            group.pending.remove(&sequence);
            group.redeliver.remove(&sequence);
        }
    }

    pub fn release(&mut self, key: &GroupKey, sequence: u64, member: SubscriptionId, now: Instant) {
        if let Some(group) = self.groups.get_mut(key) {
            if let Some(pending) = group.pending.get_mut(&sequence) {
                if pending.member == member {
                    pending.deadline = now;
                }
            }
        }
    }

    /// Expires overdue deliveries, hands out envelopes to members with spare capacity
    /// and returns the point in time at which the next pending delivery expires.
    pub fn pump(&mut self, inner: &Arc<Inner>, now: Instant) -> Option<Instant> {
        let connected = self.status == ConnectionStatus::Connected;
        let State {
            logs,
            groups,
            subscriptions,
            ..
        } = self;
        let empty = Vec::new();

        for (key, group) in groups.iter_mut() {
            let expired: Vec<u64> = group
                .pending
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(sequence, _)| *sequence)
                .collect();

            for sequence in expired {
                group.pending.remove(&sequence);
                group.redeliver.insert(sequence);
            }

            if !connected {
                continue;
            }

            let log = logs.get(&key.0).unwrap_or(&empty);

            while let Some(sequence) = group.next_candidate(log) {
                let index = match group.next_available_member() {
                    Some(index) => index,
                    None => break,
                };

                let payload = match log.get(sequence as usize - 1) {
                    Some((_, payload)) => payload.clone(),
                    None => break,
                };

                group.take_candidate(sequence);

                let delivery_count = {
                    let count = group.deliveries.entry(sequence).or_default();
                    *count += 1;
                    *count
                };

                let member = &group.members[index];
                let envelope = MemoryEnvelope::new(
                    inner.clone(),
                    key.clone(),
                    member.id,
                    sequence,
                    delivery_count,
                    payload,
                );

                if member.sender.unbounded_send(envelope).is_ok() {
                    group.pending.insert(
                        sequence,
                        PendingDelivery {
                            member: member.id,
                            deadline: now + member.ack_wait,
                        },
                    );
                } else {
                    // Receiving side is gone, undo the delivery and forget about the member
                    let id = member.id;
                    group.members.remove(index);
                    group.next_member = 0;
                    group.redeliver.insert(sequence);

                    if let Some(count) = group.deliveries.get_mut(&sequence) {
                        *count -= 1;
                    }

                    subscriptions.remove(&id);
                }
            }
        }

        groups
            .values()
            .flat_map(|group| group.pending.values().map(|pending| pending.deadline))
            .min()
    }
}
