use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// Lifecycle stage of a live consultation, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionPhase {
    Active,
    AwaitingExtension,
    GracePeriod,
    Completed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Active => "active",
            SessionPhase::AwaitingExtension => "awaiting_extension",
            SessionPhase::GracePeriod => "grace_period",
            SessionPhase::Completed => "completed",
        }
    }

    /// Strict, case-insensitive parse. `None` for anything outside the four known statuses.
    pub fn parse_known(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "active" => Some(SessionPhase::Active),
            "awaiting_extension" => Some(SessionPhase::AwaitingExtension),
            "grace_period" => Some(SessionPhase::GracePeriod),
            "completed" => Some(SessionPhase::Completed),
            _ => None,
        }
    }

    /// Lenient parse used at the wire boundary: unknown statuses end the session.
    pub fn from_status(status: &str) -> Self {
        Self::parse_known(status).unwrap_or_else(|| {
            warn!("Unrecognized consultation status '{}', treating as completed", status);
            SessionPhase::Completed
        })
    }

    /// Phases in which the countdown runs.
    pub fn is_timed(&self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::GracePeriod)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SessionPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SessionPhase::from_status(&raw))
    }
}

/// Response body of every consultation action, `sync` included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationSnapshot {
    pub consultation_id: String,
    pub status: SessionPhase,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub scheduled_end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extension_count: u32,
    #[serde(default)]
    pub grace_period_end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub original_duration_minutes: Option<u32>,
    #[serde(default)]
    pub session_start_time: Option<DateTime<Utc>>,
    pub server_time: DateTime<Utc>,
}
