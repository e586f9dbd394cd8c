use chrono::{DateTime, Duration, Utc};

use shared_config::AppConfig;

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub redis_url: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            redis_url: std::env::var("REDIS_TEST_URL").ok(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_access_token: None,
            supabase_realtime_url: shared_config::realtime_url_from(&self.supabase_url),
            consultation_function: "consultation-session".to_string(),
            chat_messages_table: "chat_messages".to_string(),
            redis_url: self.redis_url.clone(),
            message_sweep_interval_seconds: 60,
        }
    }
}

/// Fixed instant used as "server now" in time-arithmetic tests.
pub fn fixed_server_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-22T10:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub fn seconds_after(base: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    base + Duration::seconds(seconds)
}
