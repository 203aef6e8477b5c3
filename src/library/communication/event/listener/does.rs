use super::*;
use crate::library::communication::event::{handler_fn, Delivery, EventPublisher, Payload};
use crate::library::communication::implementation::memory::InMemoryBroker;
use crate::library::EmptyResult;
use futures::poll;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, Notify};
use tokio::task::yield_now;
use tokio::time::{sleep, Instant};

const SUBJECT: &str = "ticket:created";
const GROUP: &str = "orders-service-queue-group";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ticket {
    id: String,
    price: f64,
}

impl Event for Ticket {
    const SUBJECT: &'static str = SUBJECT;
}

fn ticket() -> Ticket {
    Ticket {
        id: "abc".into(),
        price: 20.0,
    }
}

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<(Ticket, Delivery, Instant)>>>,
}

impl Recorder {
    fn record(&self, ticket: Ticket, delivery: Delivery) {
        self.calls
            .lock()
            .unwrap()
            .push((ticket, delivery, Instant::now()));
    }

    fn calls(&self) -> Vec<(Ticket, Delivery, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    fn sequences(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .map(|(_, delivery, _)| delivery.sequence)
            .collect()
    }
}

fn succeeding(recorder: &Recorder) -> impl Handler<Event = Ticket> + 'static {
    let recorder = recorder.clone();

    handler_fn(move |ticket: Ticket, delivery: Delivery| {
        let recorder = recorder.clone();
        async move {
            recorder.record(ticket, delivery);
            EmptyResult::Ok(())
        }
    })
}

fn failing(recorder: &Recorder) -> impl Handler<Event = Ticket> + 'static {
    let recorder = recorder.clone();

    handler_fn(move |ticket: Ticket, delivery: Delivery| {
        let recorder = recorder.clone();
        async move {
            recorder.record(ticket, delivery);
            EmptyResult::Err("ticket service unavailable".into())
        }
    })
}

fn listener<H>(
    broker: &Arc<InMemoryBroker>,
    policy: SubscriptionPolicy,
    handler: H,
) -> Listener<InMemoryBroker, JsonDecoder<Ticket>, H>
where
    H: Handler<Event = Ticket> + 'static,
{
    Listener::for_event(broker.clone(), GROUP, policy, handler).unwrap()
}

async fn publish_raw(broker: &InMemoryBroker, payload: Payload) -> u64 {
    let subject = Subject::new(SUBJECT).unwrap();
    broker.publish(&subject, payload).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn reject_invalid_bindings() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let policy = SubscriptionPolicy::default();

    let empty_subject = Listener::bind(
        broker.clone(),
        "",
        GROUP,
        policy.clone(),
        JsonDecoder::<Ticket>::default(),
        succeeding(&recorder),
    );
    assert!(matches!(empty_subject, Err(ConfigurationError::EmptySubject)));

    let empty_group = Listener::bind(
        broker,
        SUBJECT,
        "",
        policy,
        JsonDecoder::<Ticket>::default(),
        succeeding(&recorder),
    );
    assert!(matches!(empty_group, Err(ConfigurationError::EmptyGroup)));
}

#[tokio::test(start_paused = true)]
async fn fall_back_to_group_as_durable_name() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();

    let implicit = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));
    assert_eq!(implicit.durable_name().as_str(), GROUP);

    let policy = SubscriptionPolicy::builder()
        .durable_name("order-service")
        .build()
        .unwrap();
    let explicit = listener(&broker, policy, succeeding(&recorder));
    assert_eq!(explicit.durable_name().as_str(), "order-service");
    assert_eq!(explicit.group().as_str(), GROUP);
}

#[tokio::test(start_paused = true)]
async fn subscribe_exactly_once() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));

    assert_eq!(listener.state(), ListenerState::Unbound);

    listener.start().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Subscribed);

    listener.start().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Subscribed);
    assert_eq!(broker.member_count(SUBJECT, GROUP), 1);
}

#[tokio::test(start_paused = true)]
async fn fail_to_start_while_disconnected() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));

    broker.disconnect();

    let result = listener.start().await;
    assert!(matches!(
        result,
        Err(ListenerError::Transport(TransportError::NotConnected))
    ));
    assert_eq!(listener.state(), ListenerState::Unbound);

    broker.reconnect();
    listener.start().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn refuse_restart_after_stop() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));

    listener.start().await.unwrap();
    listener.stop().await;
    listener.stop().await;

    assert_eq!(listener.state(), ListenerState::Closed);
    assert_eq!(broker.member_count(SUBJECT, GROUP), 0);
    assert!(matches!(
        listener.start().await,
        Err(ListenerError::Lifecycle(LifecycleError::Closed))
    ));
}

#[tokio::test(start_paused = true)]
async fn acknowledge_after_successful_handling() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));

    listener.start().await.unwrap();
    let sequence = publish_raw(&broker, r#"{"id":"abc","price":20}"#.into()).await;
    assert_eq!(sequence, 1);

    sleep(Duration::from_millis(5000)).await;

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ticket());
    assert_eq!(calls[0].1.sequence, 1);
    assert!(!calls[0].1.redelivered());

    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);
    assert_eq!(broker.delivery_count(SUBJECT, GROUP, 1), 1);
}

#[tokio::test(start_paused = true)]
async fn redeliver_when_handler_fails() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let attempts = recorder.clone();

    let handler = handler_fn(move |ticket: Ticket, delivery: Delivery| {
        let attempts = attempts.clone();
        async move {
            let first_attempt = !delivery.redelivered();
            attempts.record(ticket, delivery);

            if first_attempt {
                EmptyResult::Err("database unavailable".into())
            } else {
                EmptyResult::Ok(())
            }
        }
    });

    let mut listener = listener(&broker, SubscriptionPolicy::default(), handler);
    listener.start().await.unwrap();
    broker.publish_event(&ticket()).await.unwrap();

    sleep(Duration::from_millis(1000)).await;
    assert!(broker.acknowledged(SUBJECT, GROUP).is_empty());

    sleep(Duration::from_millis(10_000)).await;

    let calls = recorder.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, calls[1].0);
    assert_eq!(calls[1].1.sequence, 1);
    assert!(calls[1].2 - calls[0].2 >= Duration::from_millis(5000));
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn never_acknowledge_failed_deliveries() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), failing(&recorder));

    listener.start().await.unwrap();
    broker.publish_event(&ticket()).await.unwrap();

    sleep(Duration::from_secs(30)).await;

    assert!(recorder.calls().len() >= 5);
    assert!(broker.acknowledged(SUBJECT, GROUP).is_empty());
}

#[tokio::test(start_paused = true)]
async fn leave_malformed_payloads_unacknowledged() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));

    listener.start().await.unwrap();
    publish_raw(&broker, Payload::Binary(vec![0xde, 0xad, 0xbe, 0xef])).await;

    sleep(Duration::from_secs(12)).await;

    assert!(recorder.calls().is_empty());
    assert!(broker.acknowledged(SUBJECT, GROUP).is_empty());
    assert!(broker.delivery_count(SUBJECT, GROUP, 1) >= 2);
}

#[tokio::test(start_paused = true)]
async fn dispatch_in_sequence_order() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();

    for index in 0..10 {
        let ticket = Ticket {
            id: format!("ticket-{}", index),
            price: index as f64,
        };
        broker.publish_event(&ticket).await.unwrap();
    }

    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));
    listener.start().await.unwrap();

    sleep(Duration::from_secs(1)).await;

    assert_eq!(recorder.sequences(), (1..=10).collect::<Vec<_>>());
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), (1..=10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn share_messages_between_group_members() {
    let broker = Arc::new(InMemoryBroker::new());
    let first_recorder = Recorder::default();
    let second_recorder = Recorder::default();

    let mut first = listener(&broker, SubscriptionPolicy::default(), succeeding(&first_recorder));
    let mut second = listener(&broker, SubscriptionPolicy::default(), succeeding(&second_recorder));
    first.start().await.unwrap();
    second.start().await.unwrap();

    for _ in 0..20 {
        broker.publish_event(&ticket()).await.unwrap();
    }

    sleep(Duration::from_secs(1)).await;

    let first_sequences: BTreeSet<u64> = first_recorder.sequences().into_iter().collect();
    let second_sequences: BTreeSet<u64> = second_recorder.sequences().into_iter().collect();

    assert!(!first_sequences.is_empty());
    assert!(!second_sequences.is_empty());
    assert!(first_sequences.is_disjoint(&second_sequences));
    assert_eq!(
        first_recorder.calls().len() + second_recorder.calls().len(),
        20
    );
    assert_eq!(
        first_sequences.union(&second_sequences).copied().collect::<Vec<_>>(),
        (1..=20).collect::<Vec<_>>()
    );
}

#[tokio::test(start_paused = true)]
async fn wait_for_in_flight_handler_when_stopping() {
    let broker = Arc::new(InMemoryBroker::new());
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let recorder = Recorder::default();

    let handler = {
        let (started, release, finished, recorder) = (
            started.clone(),
            release.clone(),
            finished.clone(),
            recorder.clone(),
        );

        handler_fn(move |ticket: Ticket, delivery: Delivery| {
            let (started, release, finished, recorder) = (
                started.clone(),
                release.clone(),
                finished.clone(),
                recorder.clone(),
            );

            async move {
                recorder.record(ticket, delivery);
                started.notify_one();
                release.notified().await;
                finished.store(true, Ordering::SeqCst);
                EmptyResult::Ok(())
            }
        })
    };

    let mut listener = listener(&broker, SubscriptionPolicy::default(), handler);
    listener.start().await.unwrap();
    broker.publish_event(&ticket()).await.unwrap();
    started.notified().await;

    let mut stopper = tokio::spawn(async move {
        listener.stop().await;
        listener
    });

    for _ in 0..10 {
        yield_now().await;
    }

    assert!(poll!(&mut stopper).is_pending());
    assert!(!finished.load(Ordering::SeqCst));

    release.notify_one();
    let listener = stopper.await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(listener.state(), ListenerState::Closed);
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);

    broker.publish_event(&ticket()).await.unwrap();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(recorder.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatch_concurrently_when_fanning_out() {
    let broker = Arc::new(InMemoryBroker::new());
    let barrier = Arc::new(Barrier::new(3));
    let recorder = Recorder::default();

    let handler = {
        let (barrier, recorder) = (barrier.clone(), recorder.clone());

        handler_fn(move |ticket: Ticket, delivery: Delivery| {
            let (barrier, recorder) = (barrier.clone(), recorder.clone());

            async move {
                barrier.wait().await;
                recorder.record(ticket, delivery);
                EmptyResult::Ok(())
            }
        })
    };

    let policy = SubscriptionPolicy::builder().max_in_flight(3).build().unwrap();
    let mut listener = listener(&broker, policy, handler);
    listener.start().await.unwrap();

    for _ in 0..3 {
        broker.publish_event(&ticket()).await.unwrap();
    }

    sleep(Duration::from_secs(1)).await;

    assert_eq!(recorder.calls().len(), 3);
    assert_eq!(broker.acknowledged(SUBJECT, GROUP).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn dead_letter_after_max_deliveries() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let policy = SubscriptionPolicy::builder().max_deliveries(2).build().unwrap();
    let mut listener = listener(&broker, policy, failing(&recorder));

    listener.start().await.unwrap();
    let payload: Payload = r#"{"id":"abc","price":20}"#.into();
    publish_raw(&broker, payload.clone()).await;

    sleep(Duration::from_secs(20)).await;

    assert_eq!(recorder.calls().len(), 2);
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);
    assert_eq!(broker.messages("ticket:created:dead-letter"), vec![payload]);
}

#[tokio::test(start_paused = true)]
async fn dead_letter_poison_messages() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let policy = SubscriptionPolicy::builder()
        .max_deliveries(3)
        .dead_letter_subject("poison")
        .build()
        .unwrap();
    let mut listener = listener(&broker, policy, succeeding(&recorder));

    listener.start().await.unwrap();
    publish_raw(&broker, "not even json".into()).await;

    sleep(Duration::from_secs(30)).await;

    assert!(recorder.calls().is_empty());
    assert_eq!(broker.delivery_count(SUBJECT, GROUP, 1), 3);
    assert_eq!(broker.messages("poison"), vec![Payload::from("not even json")]);
}

#[tokio::test(start_paused = true)]
async fn resubscribe_after_reconnect() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));

    listener.start().await.unwrap();
    broker.publish_event(&ticket()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    broker.disconnect();
    assert_eq!(broker.member_count(SUBJECT, GROUP), 0);

    sleep(Duration::from_secs(1)).await;
    broker.reconnect();
    sleep(Duration::from_secs(6)).await;

    assert_eq!(broker.member_count(SUBJECT, GROUP), 1);
    broker.publish_event(&ticket()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.sequences(), vec![1, 2]);
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1, 2]);
    assert_eq!(listener.state(), ListenerState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn keep_waiting_for_broker_during_long_outages() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));
    let exit = listener.exit_signal();

    listener.start().await.unwrap();
    broker.disconnect();

    sleep(Duration::from_secs(15 * 60)).await;
    assert_eq!(*exit.borrow(), None);
    assert_eq!(listener.state(), ListenerState::Subscribed);

    broker.reconnect();
    sleep(Duration::from_secs(10)).await;
    broker.publish_event(&ticket()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(broker.member_count(SUBJECT, GROUP), 1);
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn restart_after_giving_up_on_reconnecting() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let policy = SubscriptionPolicy::builder()
        .max_reconnect_attempts(3)
        .build()
        .unwrap();
    let mut listener = listener(&broker, policy, succeeding(&recorder));
    let mut exit = listener.exit_signal();

    listener.start().await.unwrap();
    broker.disconnect();

    exit.changed().await.unwrap();
    assert_eq!(*exit.borrow(), Some(WorkerExit::ReconnectFailed));
    assert_eq!(listener.state(), ListenerState::Unbound);

    broker.reconnect();
    listener.start().await.unwrap();

    assert_eq!(listener.state(), ListenerState::Subscribed);
    assert_eq!(*listener.exit_signal().borrow(), None);
    assert_eq!(broker.member_count(SUBJECT, GROUP), 1);

    broker.publish_event(&ticket()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.sequences(), vec![1]);
    assert_eq!(broker.acknowledged(SUBJECT, GROUP), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn report_closed_transport() {
    let broker = Arc::new(InMemoryBroker::new());
    let recorder = Recorder::default();
    let mut listener = listener(&broker, SubscriptionPolicy::default(), succeeding(&recorder));
    let mut exit = listener.exit_signal();

    listener.start().await.unwrap();
    broker.close().await;

    exit.changed().await.unwrap();
    assert_eq!(*exit.borrow(), Some(WorkerExit::TransportClosed));
    assert_eq!(listener.state(), ListenerState::Unbound);
    assert!(matches!(
        listener.start().await,
        Err(ListenerError::Transport(TransportError::Closed))
    ));

    listener.stop().await;
    assert_eq!(listener.state(), ListenerState::Closed);
}
