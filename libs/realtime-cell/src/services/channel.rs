use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use shared_utils::BackoffTable;

use crate::{ConnectionState, RawChangeEvent, RealtimeError, RealtimeEvent, RealtimeSubscription, Topic};

/// Change events of one connection. The stream ending, or yielding an error, means the connection dropped.
pub type ChangeStream = BoxStream<'static, Result<RawChangeEvent, RealtimeError>>;

/// A subscribable source of row-change events keyed by table and equality filter.
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn connect(&self, subscription: &RealtimeSubscription) -> Result<ChangeStream, RealtimeError>;
}

struct ActiveChannel {
    subscription: RealtimeSubscription,
    intentional: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ActiveChannel {
    // Returns once the worker has stopped, so no callback runs after this.
    async fn shutdown(self) {
        self.intentional.store(true, Ordering::SeqCst);
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct RealtimeChannelManager {
    source: Arc<dyn PushSource>,
    backoff: BackoffTable,
    channels: Mutex<HashMap<Topic, ActiveChannel>>,
    states: StdMutex<HashMap<Topic, watch::Sender<ConnectionState>>>,
}

impl RealtimeChannelManager {
    pub fn new(source: Arc<dyn PushSource>) -> Self {
        Self::with_backoff(source, BackoffTable::reconnect())
    }

    pub fn with_backoff(source: Arc<dyn PushSource>, backoff: BackoffTable) -> Self {
        Self {
            source,
            backoff,
            channels: Mutex::new(HashMap::new()),
            states: StdMutex::new(HashMap::new()),
        }
    }

    /// Opens the subscription for `topic`, tearing down any previous one for the same topic first.
    #[instrument(skip(self, subscription, on_event), fields(topic = %topic, channel = %subscription.channel_name))]
    pub async fn subscribe<E, F>(&self, topic: Topic, subscription: RealtimeSubscription, on_event: F)
    where
        E: RealtimeEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        let mut channels = self.channels.lock().await;

        if let Some(previous) = channels.remove(&topic) {
            debug!("Replacing subscription {} for topic {}", previous.subscription.channel_name, topic);
            previous.shutdown().await;
        }

        let intentional = Arc::new(AtomicBool::new(false));
        let worker = ChannelWorker {
            topic,
            source: Arc::clone(&self.source),
            subscription: subscription.clone(),
            backoff: self.backoff.clone(),
            state_tx: self.state_sender(topic),
            intentional: Arc::clone(&intentional),
        };

        let handle = tokio::spawn(worker.run(on_event));

        info!("Subscribed to {} on {}", subscription.filter_expression(), subscription.table_name);
        channels.insert(topic, ActiveChannel {
            subscription,
            intentional,
            handle,
        });
    }

    /// Tears down the subscription for `topic` without scheduling a reconnect.
    pub async fn unsubscribe(&self, topic: Topic) -> bool {
        let removed = self.channels.lock().await.remove(&topic);

        match removed {
            Some(channel) => {
                channel.shutdown().await;
                self.state_sender(topic).send_replace(ConnectionState::Disconnected);
                debug!("Unsubscribed from topic {}", topic);
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe_all(&self) {
        let drained: Vec<(Topic, ActiveChannel)> = self.channels.lock().await.drain().collect();

        for (topic, channel) in drained {
            channel.shutdown().await;
            self.state_sender(topic).send_replace(ConnectionState::Disconnected);
        }
    }

    pub async fn active_subscriptions(&self) -> Vec<(Topic, RealtimeSubscription)> {
        let channels = self.channels.lock().await;
        channels
            .iter()
            .map(|(topic, channel)| (*topic, channel.subscription.clone()))
            .collect()
    }

    /// Connection state of `topic`. The receiver stays valid across resubscribes.
    pub fn connection_state(&self, topic: Topic) -> watch::Receiver<ConnectionState> {
        self.state_sender(topic).subscribe()
    }

    fn state_sender(&self, topic: Topic) -> watch::Sender<ConnectionState> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .entry(topic)
            .or_insert_with(|| watch::channel(ConnectionState::Disconnected).0)
            .clone()
    }
}

impl Drop for RealtimeChannelManager {
    fn drop(&mut self) {
        for (_, channel) in self.channels.get_mut().drain() {
            channel.intentional.store(true, Ordering::SeqCst);
            channel.handle.abort();
        }
    }
}

struct ChannelWorker {
    topic: Topic,
    source: Arc<dyn PushSource>,
    subscription: RealtimeSubscription,
    backoff: BackoffTable,
    state_tx: watch::Sender<ConnectionState>,
    intentional: Arc<AtomicBool>,
}

impl ChannelWorker {
    // The loop body is the only place a reconnect is scheduled, so at most one is ever pending.
    async fn run<E, F>(self, on_event: F)
    where
        E: RealtimeEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        let mut attempt: u32 = 0;

        loop {
            self.state_tx.send_replace(ConnectionState::Connecting);

            match self.source.connect(&self.subscription).await {
                Ok(mut stream) => {
                    self.state_tx.send_replace(ConnectionState::Connected);
                    attempt = 0;
                    debug!("Channel {} connected", self.subscription.channel_name);

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(change) => self.deliver(change, &on_event),
                            Err(e) => {
                                warn!("Channel {} dropped: {}", self.subscription.channel_name, e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Channel {} failed to connect: {}", self.subscription.channel_name, e);
                }
            }

            self.state_tx.send_replace(ConnectionState::Disconnected);

            if self.intentional.load(Ordering::SeqCst) {
                break;
            }

            let delay = self.backoff.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            warn!(
                "Reconnecting topic {} in {:?} (attempt {})",
                self.topic, delay, attempt
            );
            tokio::time::sleep(delay).await;

            if self.intentional.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    fn deliver<E, F>(&self, change: RawChangeEvent, on_event: &F)
    where
        E: RealtimeEvent,
        F: Fn(E),
    {
        if !change.operation.is_upsert() {
            debug!("Ignoring {:?} on {}", change.operation, change.table);
            return;
        }

        if self.intentional.load(Ordering::SeqCst) {
            return;
        }

        match E::from_change(&change) {
            Some(event) => on_event(event),
            None => debug!("Dropping malformed change on {}: missing identity fields", change.table),
        }
    }
}
