use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

use crate::{TimerAnchor, TimerSignal};

/// Repeating countdown over a [`TimerAnchor`].
///
/// Each tick recomputes remaining time from the anchor, so ticks lost to a
/// suspended process are skipped instead of replayed.
pub struct CountdownTimer {
    tick_interval: Duration,
    anchor: Option<TimerAnchor>,
    handle: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            anchor: None,
            handle: None,
        }
    }

    /// Starts ticking from `anchor`, replacing any countdown already running.
    /// The first tick fires immediately.
    pub fn start<F>(&mut self, anchor: TimerAnchor, on_signal: F)
    where
        F: Fn(TimerSignal) + Send + 'static,
    {
        self.stop();

        let tick_interval = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticks = interval(tick_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;
                let remaining = anchor.remaining();
                on_signal(TimerSignal::Tick(remaining));

                if remaining.is_zero() {
                    on_signal(TimerSignal::Expired);
                    break;
                }
            }
        });

        debug!("Countdown started with {:?} remaining", anchor.remaining_at_anchor);
        self.anchor = Some(anchor);
        self.handle = Some(handle);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.anchor = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn anchor(&self) -> Option<TimerAnchor> {
        self.anchor
    }
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new(crate::TICK_INTERVAL)
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
