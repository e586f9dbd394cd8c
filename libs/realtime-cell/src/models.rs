use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shared_models::SessionPhase;

/// Logical stream a consumer listens to. One live subscription per topic per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Messages,
    Typing,
    ConsultationStatus,
    Request,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Messages => "messages",
            Topic::Typing => "typing",
            Topic::ConsultationStatus => "consultation_status",
            Topic::Request => "request",
        }
    }

    pub fn default_table(&self) -> &'static str {
        match self {
            Topic::Messages => "chat_messages",
            Topic::Typing => "typing_indicators",
            Topic::ConsultationStatus => "consultations",
            Topic::Request => "consultation_requests",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Identity of a push subscription. Replaced wholesale on resubscribe, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RealtimeSubscription {
    pub channel_name: String,
    pub table_name: String,
    pub filter_column: String,
    pub filter_value: String,
}

impl RealtimeSubscription {
    pub fn new(
        channel_name: impl Into<String>,
        table_name: impl Into<String>,
        filter_column: impl Into<String>,
        filter_value: impl Into<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            table_name: table_name.into(),
            filter_column: filter_column.into(),
            filter_value: filter_value.into(),
        }
    }

    pub fn consultation_status(consultation_id: &str) -> Self {
        Self::new(
            format!("consultation-status:{}", consultation_id),
            Topic::ConsultationStatus.default_table(),
            "id",
            consultation_id,
        )
    }

    pub fn messages(consultation_id: &str) -> Self {
        Self::new(
            format!("messages:{}", consultation_id),
            Topic::Messages.default_table(),
            "consultation_id",
            consultation_id,
        )
    }

    pub fn typing(consultation_id: &str) -> Self {
        Self::new(
            format!("typing:{}", consultation_id),
            Topic::Typing.default_table(),
            "consultation_id",
            consultation_id,
        )
    }

    pub fn requests(patient_id: &str) -> Self {
        Self::new(
            format!("requests:{}", patient_id),
            Topic::Request.default_table(),
            "patient_id",
            patient_id,
        )
    }

    /// PostgREST-style equality filter, e.g. `id=eq.42`.
    pub fn filter_expression(&self) -> String {
        format!("{}=eq.{}", self.filter_column, self.filter_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeOperation::Insert),
            "UPDATE" => Some(ChangeOperation::Update),
            "DELETE" => Some(ChangeOperation::Delete),
            _ => None,
        }
    }

    pub fn is_upsert(&self) -> bool {
        matches!(self, ChangeOperation::Insert | ChangeOperation::Update)
    }
}

/// A row change as delivered by the push source, before mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeEvent {
    pub table: String,
    pub operation: ChangeOperation,
    pub record: Map<String, Value>,
}

impl RawChangeEvent {
    pub fn new(table: impl Into<String>, operation: ChangeOperation, record: Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            operation,
            record,
        }
    }

    /// String column; numeric ids are accepted and stringified.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.record.get(column)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn flag(&self, column: &str) -> Option<bool> {
        self.record.get(column)?.as_bool()
    }

    pub fn count(&self, column: &str) -> Option<u32> {
        self.record
            .get(column)?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// Typed domain event built from a raw change. `None` means the payload lacks identity fields.
pub trait RealtimeEvent: Sized + Send + 'static {
    fn from_change(change: &RawChangeEvent) -> Option<Self>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationStatusChanged {
    pub consultation_id: String,
    pub phase: SessionPhase,
    pub extension_requested: Option<bool>,
    pub patient_declined: Option<bool>,
    pub extension_count: Option<u32>,
}

impl RealtimeEvent for ConsultationStatusChanged {
    fn from_change(change: &RawChangeEvent) -> Option<Self> {
        Some(Self {
            consultation_id: change.text("id")?,
            phase: SessionPhase::from_status(&change.text("status")?),
            extension_requested: change.flag("extension_requested"),
            patient_declined: change.flag("patient_declined"),
            extension_count: change.count("extension_count"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageReceived {
    pub message_id: String,
    pub consultation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: Option<String>,
}

impl RealtimeEvent for ChatMessageReceived {
    fn from_change(change: &RawChangeEvent) -> Option<Self> {
        Some(Self {
            message_id: change.text("id")?,
            consultation_id: change.text("consultation_id")?,
            sender_id: change.text("sender_id")?,
            content: change.text("content").unwrap_or_default(),
            message_type: change.text("message_type").unwrap_or_else(|| "text".to_string()),
            created_at: change.text("created_at"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypingChanged {
    pub consultation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

impl RealtimeEvent for TypingChanged {
    fn from_change(change: &RawChangeEvent) -> Option<Self> {
        Some(Self {
            consultation_id: change.text("consultation_id")?,
            user_id: change.text("user_id")?,
            is_typing: change.flag("is_typing").unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationRequestChanged {
    pub request_id: String,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub status: String,
    pub consultation_id: Option<String>,
}

impl RealtimeEvent for ConsultationRequestChanged {
    fn from_change(change: &RawChangeEvent) -> Option<Self> {
        Some(Self {
            request_id: change.text("id")?,
            patient_id: change.text("patient_id")?,
            doctor_id: change.text("doctor_id"),
            status: change.text("status")?.to_ascii_lowercase(),
            consultation_id: change.text("consultation_id"),
        })
    }
}
