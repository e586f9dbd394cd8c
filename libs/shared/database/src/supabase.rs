use std::time::Duration;

use reqwest::{
    Client, Response, StatusCode,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::RemoteError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();

        let api_key = HeaderValue::from_str(&self.anon_key)
            .map_err(|_| RemoteError::Unauthorized("API key is not a valid header value".to_string()))?;
        headers.insert("apikey", api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RemoteError::Unauthorized("Access token is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        Ok(headers)
    }

    async fn send(&self, method: Method, path: &str,
                  auth_token: Option<&str>, body: Option<Value>,
                  prefer: Option<&'static str>)
                  -> Result<Response, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_static(prefer));
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(categorize_failure(status, &error_text));
        }

        Ok(response)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, RemoteError>
    where T: DeserializeOwned {
        let response = self.send(method, path, auth_token, body, None).await?;

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Network(e.to_string())
            } else {
                RemoteError::application("invalid_response", e.to_string())
            }
        })
    }

    /// Invokes an edge function under `/functions/v1/`.
    pub async fn invoke_function<T>(&self, function: &str, auth_token: &str, body: Value)
                                    -> Result<T, RemoteError>
    where T: DeserializeOwned {
        let path = format!("/functions/v1/{}", function);
        self.request(Method::POST, &path, Some(auth_token), Some(body)).await
    }

    /// Inserts a row and ignores a conflicting primary key, so replays of the same id are no-ops.
    pub async fn insert_ignoring_duplicates(&self, table: &str, auth_token: &str, row: Value)
                                            -> Result<(), RemoteError> {
        let path = format!("/rest/v1/{}", table);
        self.send(
            Method::POST,
            &path,
            Some(auth_token),
            Some(row),
            Some("resolution=ignore-duplicates,return=minimal"),
        ).await?;
        Ok(())
    }
}

fn categorize_failure(status: StatusCode, body: &str) -> RemoteError {
    match status.as_u16() {
        401 | 403 => RemoteError::Unauthorized(body.to_string()),
        _ => {
            let parsed: Option<Value> = serde_json::from_str(body).ok();
            let (code, message) = parsed
                .as_ref()
                .map(error_fields)
                .unwrap_or((None, None));

            RemoteError::Application {
                code: code.unwrap_or_else(|| status.as_u16().to_string()),
                message: message.unwrap_or_else(|| body.to_string()),
            }
        }
    }
}

// Accepts `{"error": {"code", "message"}}`, `{"error": "...", "code": "..."}` and PostgREST's `{"code", "message"}`.
fn error_fields(body: &Value) -> (Option<String>, Option<String>) {
    let text = |v: &Value| v.as_str().map(str::to_string);

    match body.get("error") {
        Some(Value::Object(inner)) => (
            inner.get("code").and_then(text),
            inner.get("message").and_then(text),
        ),
        Some(Value::String(message)) => (
            body.get("code").and_then(text),
            Some(message.clone()),
        ),
        _ => (
            body.get("code").and_then(text),
            body.get("message").and_then(text),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn categorizes_auth_failures() {
        assert_eq!(
            categorize_failure(StatusCode::FORBIDDEN, "nope"),
            RemoteError::Unauthorized("nope".to_string())
        );
    }

    #[test]
    fn extracts_nested_error_code() {
        let body = json!({"error": {"code": "invalid_phase", "message": "Consultation is not active"}}).to_string();
        assert_eq!(
            categorize_failure(StatusCode::BAD_REQUEST, &body),
            RemoteError::application("invalid_phase", "Consultation is not active")
        );
    }

    #[test]
    fn falls_back_to_status_code_for_plain_bodies() {
        assert_eq!(
            categorize_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            RemoteError::application("500", "boom")
        );
    }
}
