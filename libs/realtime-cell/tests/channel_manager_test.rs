use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use realtime_cell::*;

type Sender = mpsc::UnboundedSender<Result<RawChangeEvent, RealtimeError>>;

/// Push source whose connections are driven by the test.
#[derive(Default)]
struct ScriptedSource {
    failures_remaining: AtomicU32,
    connects: Mutex<Vec<Instant>>,
    live: Arc<AtomicUsize>,
    senders: Mutex<Vec<Sender>>,
}

impl ScriptedSource {
    fn failing(times: u32) -> Self {
        let source = Self::default();
        source.failures_remaining.store(times, Ordering::SeqCst);
        source
    }

    fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn push(&self, operation: ChangeOperation, record: Value) {
        let record = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(tx) = self.senders.lock().unwrap().last() {
            let _ = tx.send(Ok(RawChangeEvent::new("consultations", operation, record)));
        }
    }

    fn drop_connection(&self) {
        self.senders.lock().unwrap().pop();
    }
}

struct TrackedStream {
    inner: ChangeStream,
    live: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<RawChangeEvent, RealtimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushSource for ScriptedSource {
    async fn connect(&self, _subscription: &RealtimeSubscription) -> Result<ChangeStream, RealtimeError> {
        self.connects.lock().unwrap().push(Instant::now());

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(RealtimeError::Connection("refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        self.live.fetch_add(1, Ordering::SeqCst);

        let inner = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(TrackedStream {
            inner: Box::pin(inner),
            live: Arc::clone(&self.live),
        }))
    }
}

fn manager_with(scripted: Arc<ScriptedSource>) -> (RealtimeChannelManager, Arc<ScriptedSource>) {
    let source: Arc<dyn PushSource> = scripted.clone();
    (RealtimeChannelManager::new(source), scripted)
}

async fn wait_connected(manager: &RealtimeChannelManager, topic: Topic) {
    let mut state = manager.connection_state(topic);
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .expect("state channel should stay open");
}

#[tokio::test(start_paused = true)]
async fn test_delivers_typed_events_and_drops_malformed_ones() {
    let (manager, source) = manager_with(Arc::new(ScriptedSource::default()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .subscribe(
            Topic::ConsultationStatus,
            RealtimeSubscription::consultation_status("c-1"),
            move |event: ConsultationStatusChanged| {
                let _ = tx.send(event);
            },
        )
        .await;
    wait_connected(&manager, Topic::ConsultationStatus).await;

    source.push(ChangeOperation::Update, json!({"status": "active"}));
    source.push(ChangeOperation::Delete, json!({"id": "c-1", "status": "completed"}));
    source.push(ChangeOperation::Update, json!({"id": "c-1", "status": "grace_period"}));

    let event = rx.recv().await.expect("valid event should arrive");
    assert_eq!(event.consultation_id, "c-1");
    assert_eq!(event.phase, shared_models::SessionPhase::GracePeriod);

    sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "malformed and delete events must be dropped");
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_leaves_exactly_one_live_subscription() {
    let (manager, source) = manager_with(Arc::new(ScriptedSource::default()));

    manager
        .subscribe(
            Topic::Messages,
            RealtimeSubscription::messages("c-1"),
            |_: ChatMessageReceived| {},
        )
        .await;
    wait_connected(&manager, Topic::Messages).await;

    manager
        .subscribe(
            Topic::Messages,
            RealtimeSubscription::messages("c-2"),
            |_: ChatMessageReceived| {},
        )
        .await;
    sleep(Duration::from_millis(50)).await;

    let active = manager.active_subscriptions().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].1.filter_value, "c-2");
    assert_eq!(source.connect_count(), 2);
    assert_eq!(source.live_streams(), 1, "previous stream must be torn down");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_waits_follow_backoff_table_and_reset_after_connect() {
    let (manager, source) = manager_with(Arc::new(ScriptedSource::failing(6)));

    manager
        .subscribe(
            Topic::ConsultationStatus,
            RealtimeSubscription::consultation_status("c-1"),
            |_: ConsultationStatusChanged| {},
        )
        .await;

    // 1 + 2 + 5 + 10 + 30 + 30 seconds of backoff before the seventh attempt succeeds.
    sleep(Duration::from_secs(100)).await;
    assert_eq!(source.connect_count(), 7);
    assert_eq!(*manager.connection_state(Topic::ConsultationStatus).borrow(), ConnectionState::Connected);

    let table = shared_utils::BackoffTable::reconnect();
    let times = source.connect_times();
    for (k, pair) in times.windows(2).enumerate() {
        let waited = pair[1] - pair[0];
        assert!(
            waited >= table.delay_for(k as u32),
            "attempt {} waited {:?}, expected at least {:?}",
            k,
            waited,
            table.delay_for(k as u32)
        );
    }

    source.drop_connection();
    sleep(Duration::from_millis(1500)).await;

    let times = source.connect_times();
    assert_eq!(times.len(), 8);
    let waited = times[7] - times[6];
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_suppresses_reconnect_and_callbacks() {
    let (manager, source) = manager_with(Arc::new(ScriptedSource::default()));
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);

    manager
        .subscribe(
            Topic::Typing,
            RealtimeSubscription::typing("c-1"),
            move |_: TypingChanged| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
    wait_connected(&manager, Topic::Typing).await;

    assert!(manager.unsubscribe(Topic::Typing).await);
    assert!(!manager.unsubscribe(Topic::Typing).await);
    assert_eq!(*manager.connection_state(Topic::Typing).borrow(), ConnectionState::Disconnected);

    source.push(ChangeOperation::Insert, json!({"consultation_id": "c-1", "user_id": "u-1", "is_typing": true}));
    sleep(Duration::from_secs(60)).await;

    assert_eq!(source.connect_count(), 1, "no reconnect after an intentional teardown");
    assert_eq!(source.live_streams(), 0);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert!(manager.active_subscriptions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_topics_are_independent() {
    let (manager, source) = manager_with(Arc::new(ScriptedSource::default()));

    manager
        .subscribe(Topic::Messages, RealtimeSubscription::messages("c-1"), |_: ChatMessageReceived| {})
        .await;
    manager
        .subscribe(Topic::Request, RealtimeSubscription::requests("p-1"), |_: ConsultationRequestChanged| {})
        .await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.active_subscriptions().await.len(), 2);
    assert_eq!(source.live_streams(), 2);

    manager.unsubscribe_all().await;
    assert_eq!(source.live_streams(), 0);
}
