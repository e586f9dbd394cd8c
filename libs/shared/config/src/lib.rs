use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_access_token: Option<String>,
    pub supabase_realtime_url: String,
    pub consultation_function: String,
    pub chat_messages_table: String,
    pub redis_url: Option<String>,
    pub message_sweep_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });

        let config = Self {
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_access_token: env::var("SUPABASE_ACCESS_TOKEN").ok(),
            supabase_realtime_url: env::var("SUPABASE_REALTIME_URL")
                .unwrap_or_else(|_| realtime_url_from(&supabase_url)),
            consultation_function: env::var("CONSULTATION_FUNCTION_NAME")
                .unwrap_or_else(|_| "consultation-session".to_string()),
            chat_messages_table: env::var("CHAT_MESSAGES_TABLE")
                .unwrap_or_else(|_| "chat_messages".to_string()),
            redis_url: env::var("REDIS_URL").ok(),
            message_sweep_interval_seconds: env::var("MESSAGE_SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|value| match value.parse() {
                    Ok(seconds) => Some(seconds),
                    Err(_) => {
                        warn!("MESSAGE_SWEEP_INTERVAL_SECONDS is not a number: {}", value);
                        None
                    }
                })
                .unwrap_or(60),
            supabase_url,
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
    }

    /// Bearer token for Supabase calls; the anon key stands in when no user token is configured.
    pub fn bearer_token(&self) -> &str {
        self.supabase_access_token
            .as_deref()
            .unwrap_or(&self.supabase_anon_key)
    }
}

/// `https://x.supabase.co` -> `wss://x.supabase.co/realtime/v1`
pub fn realtime_url_from(supabase_url: &str) -> String {
    let trimmed = supabase_url.trim_end_matches('/');
    let ws = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    };
    format!("{}/realtime/v1", ws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_swaps_scheme() {
        assert_eq!(
            realtime_url_from("https://abc.supabase.co/"),
            "wss://abc.supabase.co/realtime/v1"
        );
        assert_eq!(
            realtime_url_from("http://localhost:54321"),
            "ws://localhost:54321/realtime/v1"
        );
    }

    #[test]
    fn bearer_token_falls_back_to_anon_key() {
        let mut config = AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "anon".to_string(),
            supabase_access_token: None,
            supabase_realtime_url: String::new(),
            consultation_function: "consultation-session".to_string(),
            chat_messages_table: "chat_messages".to_string(),
            redis_url: None,
            message_sweep_interval_seconds: 60,
        };
        assert_eq!(config.bearer_token(), "anon");

        config.supabase_access_token = Some("user-jwt".to_string());
        assert_eq!(config.bearer_token(), "user-jwt");
    }
}
