use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};
use tracing::info;

use shared_models::{ConsultationSnapshot, SessionPhase};

use crate::{SessionConfig, TimerAnchor};

/// Phase and fresh anchor derived from one server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub phase: SessionPhase,
    pub anchor: TimerAnchor,
    /// Set when an end timestamp was missing and a default filled in.
    pub used_fallback: bool,
}

/// Turns server timestamps into monotonic anchors. All wall-clock arithmetic lives here.
#[derive(Debug, Clone)]
pub struct TimeReconciler {
    default_duration_minutes: u32,
    default_grace_period: Duration,
}

impl TimeReconciler {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            default_duration_minutes: config.default_duration_minutes,
            default_grace_period: config.default_grace_period,
        }
    }

    pub fn reconcile(&self, snapshot: &ConsultationSnapshot) -> Reconciliation {
        self.reconcile_at(snapshot, Instant::now())
    }

    pub fn reconcile_at(&self, snapshot: &ConsultationSnapshot, now: Instant) -> Reconciliation {
        let (remaining, used_fallback) = self.remaining_for(snapshot);

        if used_fallback {
            info!(
                consultation_id = %snapshot.consultation_id,
                phase = %snapshot.status,
                "End timestamp missing, using fallback of {:?}",
                remaining
            );
        }

        Reconciliation {
            phase: snapshot.status,
            anchor: TimerAnchor::new(remaining, now),
            used_fallback,
        }
    }

    /// Remaining time at `snapshot.server_time`, and whether a fallback was taken.
    pub fn remaining_for(&self, snapshot: &ConsultationSnapshot) -> (Duration, bool) {
        let server_time = snapshot.server_time;

        match snapshot.status {
            SessionPhase::Active => match snapshot.scheduled_end_at {
                Some(end) => (until(end, server_time), false),
                None => {
                    let minutes = snapshot
                        .original_duration_minutes
                        .unwrap_or(self.default_duration_minutes);
                    let duration = Duration::from_secs(u64::from(minutes) * 60);

                    let remaining = match snapshot.session_start_time {
                        Some(start) => match chrono::Duration::from_std(duration) {
                            Ok(length) => until(start + length, server_time),
                            Err(_) => duration,
                        },
                        None => duration,
                    };
                    (remaining, true)
                }
            },
            SessionPhase::GracePeriod => match snapshot.grace_period_end_at {
                Some(end) => (until(end, server_time), false),
                None => (self.default_grace_period, true),
            },
            SessionPhase::AwaitingExtension | SessionPhase::Completed => (Duration::ZERO, false),
        }
    }
}

impl Default for TimeReconciler {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

// Negative spans clamp to zero.
fn until(end: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (end - now).to_std().unwrap_or(Duration::ZERO)
}
