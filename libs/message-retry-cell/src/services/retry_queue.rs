use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

use shared_utils::Clock;

use crate::services::sender::MessageSender;
use crate::services::store::MessageStore;
use crate::{OutboundMessage, RetryQueueConfig, StoreError, SweepReport};

/// Delivers outbound messages and retries the ones that failed.
pub struct MessageRetryQueue {
    store: Arc<dyn MessageStore>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
    config: RetryQueueConfig,
    sweeping: AtomicBool,
    // Ids with a send in progress in this process, from either path.
    in_flight: Mutex<HashSet<String>>,
}

struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    message_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.message_id);
    }
}

impl MessageRetryQueue {
    pub fn new(
        store: Arc<dyn MessageStore>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
        config: RetryQueueConfig,
    ) -> Self {
        Self {
            store,
            sender,
            clock,
            config,
            sweeping: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    /// Starts a sweep in the background. Returns `false`, doing nothing, if one is already running.
    pub fn enqueue_sweep(self: &Arc<Self>) -> bool {
        if !self.claim_sweep() {
            debug!("Sweep already running, ignoring trigger");
            return false;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let _release = SweepGuard(&queue.sweeping);
            queue.sweep().await;
        });
        true
    }

    /// Runs a sweep to completion. `None` if another sweep holds the queue.
    pub async fn run_sweep(&self) -> Option<SweepReport> {
        if !self.claim_sweep() {
            debug!("Sweep already running, ignoring trigger");
            return None;
        }

        let _release = SweepGuard(&self.sweeping);
        Some(self.sweep().await)
    }

    /// Persists `message` and attempts it right away. A failed attempt is left to the sweeps.
    ///
    /// Returns whether the message is delivered.
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn send(self: &Arc<Self>, message: OutboundMessage) -> Result<bool, StoreError> {
        if !self.store.insert(&message).await? {
            debug!("Message already persisted, resuming from stored row");
        }

        let message_id = message.message_id.clone();
        let stored = match self.store.get(&message_id).await? {
            Some(stored) => stored,
            None => message,
        };
        if stored.synced {
            return Ok(true);
        }
        if stored.is_exhausted(self.config.max_retries) {
            warn!("Message {} has exhausted its retries", stored.message_id);
            return Ok(false);
        }

        let Some(_in_flight) = self.claim_message(&stored.message_id) else {
            debug!("Message {} is already being sent", stored.message_id);
            return Ok(false);
        };

        let delivered = self.attempt(&stored).await;
        if !delivered {
            self.enqueue_sweep();
        }
        Ok(delivered)
    }

    pub async fn permanently_failed(&self) -> Result<Vec<OutboundMessage>, StoreError> {
        self.store.permanently_failed(self.config.max_retries).await
    }

    pub fn config(&self) -> &RetryQueueConfig {
        &self.config
    }

    fn claim_sweep(&self) -> bool {
        self.sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn claim_message(&self, message_id: &str) -> Option<InFlight<'_>> {
        let mut ids = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(message_id.to_string()) {
            return None;
        }

        Some(InFlight {
            ids: &self.in_flight,
            message_id: message_id.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let candidates = match self.store.retry_candidates(self.config.max_retries).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to load retry candidates: {}", e);
                return report;
            }
        };

        for message in candidates {
            if !self.is_due(&message, self.clock.now()) {
                report.deferred += 1;
                continue;
            }

            if report.attempted > 0 {
                sleep(self.config.inter_message_delay).await;
            }

            let Some(_in_flight) = self.claim_message(&message.message_id) else {
                report.deferred += 1;
                continue;
            };

            // The snapshot may be stale after the delay; only send the row as it is now.
            let current = match self.store.get(&message.message_id).await {
                Ok(Some(current)) if self.still_pending(&message, &current) => current,
                Ok(_) => {
                    debug!("Message {} changed since the sweep began, skipping", message.message_id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to reload message {}: {}", message.message_id, e);
                    report.deferred += 1;
                    continue;
                }
            };

            report.attempted += 1;
            if self.attempt(&current).await {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                "Sweep finished: {} attempted, {} delivered, {} failed, {} deferred",
                report.attempted, report.delivered, report.failed, report.deferred
            );
        } else {
            debug!("Sweep finished with nothing due ({} deferred)", report.deferred);
        }
        report
    }

    fn is_due(&self, message: &OutboundMessage, now: DateTime<Utc>) -> bool {
        let Some(failed_at) = message.failed_at else {
            return true;
        };

        let backoff = self.config.backoff.delay_for(message.retry_count);
        let elapsed = (now - failed_at).to_std().unwrap_or(Duration::ZERO);
        elapsed >= backoff
    }

    fn still_pending(&self, snapshot: &OutboundMessage, current: &OutboundMessage) -> bool {
        !current.synced
            && current.retry_count == snapshot.retry_count
            && current.is_retry_candidate(self.config.max_retries)
            && self.is_due(current, self.clock.now())
    }

    async fn attempt(&self, message: &OutboundMessage) -> bool {
        match self.sender.send_message(message).await {
            Ok(()) => {
                match self.store.mark_synced(&message.message_id).await {
                    Ok(true) => debug!("Message {} delivered", message.message_id),
                    Ok(false) => debug!("Message {} was already marked synced", message.message_id),
                    Err(e) => error!("Message {} delivered but not marked synced: {}", message.message_id, e),
                }
                true
            }
            Err(send_error) => {
                let attempt = message.retry_count + 1;
                match self
                    .store
                    .record_failure(&message.message_id, message.retry_count, self.clock.now())
                    .await
                {
                    Ok(true) => warn!(
                        "Delivery of message {} failed (attempt {}/{}): {}",
                        message.message_id, attempt, self.config.max_retries, send_error
                    ),
                    Ok(false) => debug!(
                        "Message {} changed while sending, failure not recorded",
                        message.message_id
                    ),
                    Err(e) => error!("Failed to record delivery failure of {}: {}", message.message_id, e),
                }
                false
            }
        }
    }
}
