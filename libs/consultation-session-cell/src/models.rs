use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{Duration, Instant};

use shared_models::SessionPhase;

pub const DEFAULT_DURATION_MINUTES: u32 = 15;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(180);
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables of one consultation session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub default_duration_minutes: u32,
    pub default_grace_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            default_duration_minutes: DEFAULT_DURATION_MINUTES,
            default_grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Remaining time pinned to a point on the monotonic clock.
///
/// Replaced as a whole on every resync and never decremented, so a suspended
/// process resumes with the right figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerAnchor {
    pub monotonic_timestamp: Instant,
    pub remaining_at_anchor: Duration,
}

impl TimerAnchor {
    pub fn new(remaining_at_anchor: Duration, monotonic_timestamp: Instant) -> Self {
        Self {
            monotonic_timestamp,
            remaining_at_anchor,
        }
    }

    pub fn starting_now(remaining_at_anchor: Duration) -> Self {
        Self::new(remaining_at_anchor, Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.monotonic_timestamp);
        self.remaining_at_anchor.saturating_sub(elapsed)
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick(Duration),
    /// Sent once, right after the tick that reached zero.
    Expired,
}

/// Actions understood by the consultation function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Sync,
    End,
    TimerExpired,
    RequestExtension,
    AcceptExtension,
    DeclineExtension,
    PaymentConfirmed { payment_id: String },
    CancelPayment,
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            SessionAction::Sync => "sync",
            SessionAction::End => "end",
            SessionAction::TimerExpired => "timer_expired",
            SessionAction::RequestExtension => "request_extension",
            SessionAction::AcceptExtension => "accept_extension",
            SessionAction::DeclineExtension => "decline_extension",
            SessionAction::PaymentConfirmed { .. } => "payment_confirmed",
            SessionAction::CancelPayment => "cancel_payment",
        }
    }

    pub fn request_body(&self, consultation_id: &str) -> Value {
        let mut body = json!({
            "action": self.name(),
            "consultationId": consultation_id,
        });

        if let SessionAction::PaymentConfirmed { payment_id } = self {
            body["paymentId"] = Value::String(payment_id.clone());
        }

        body
    }
}

/// What the UI renders. Only the session actor writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub consultation_id: Option<String>,
    pub phase: SessionPhase,
    pub remaining_seconds: u64,
    pub original_duration_minutes: u32,
    pub extension_count: u32,
    pub scheduled_end_at_epoch_ms: Option<i64>,
    pub grace_period_end_at_epoch_ms: Option<i64>,
    pub extension_requested: bool,
    pub patient_declined: bool,
    pub service_type: Option<String>,
    pub fee: Option<f64>,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            consultation_id: None,
            phase: SessionPhase::Active,
            remaining_seconds: 0,
            original_duration_minutes: DEFAULT_DURATION_MINUTES,
            extension_count: 0,
            scheduled_end_at_epoch_ms: None,
            grace_period_end_at_epoch_ms: None,
            extension_requested: false,
            patient_declined: false,
            service_type: None,
            fee: None,
            error: None,
        }
    }
}

impl SessionState {
    pub fn is_started(&self) -> bool {
        self.consultation_id.is_some()
    }
}

pub(crate) fn epoch_ms(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|t| t.timestamp_millis())
}
