use std::time::Duration;

/// Ordered wait durations indexed by consecutive-failure count, clamped at the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffTable {
    steps: Vec<Duration>,
}

impl BackoffTable {
    pub fn new(steps: Vec<Duration>) -> Self {
        Self { steps }
    }

    pub fn from_secs(steps: &[u64]) -> Self {
        Self::new(steps.iter().copied().map(Duration::from_secs).collect())
    }

    /// Realtime channel reconnects: 1s, 2s, 5s, 10s, 30s.
    pub fn reconnect() -> Self {
        Self::from_secs(&[1, 2, 5, 10, 30])
    }

    /// Outbound message retries: 1s, 5s, 30s, 5min, 15min.
    pub fn message_retry() -> Self {
        Self::from_secs(&[1, 5, 30, 300, 900])
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.steps.last() {
            None => Duration::ZERO,
            Some(last) => self
                .steps
                .get(attempt as usize)
                .copied()
                .unwrap_or(*last),
        }
    }
}
