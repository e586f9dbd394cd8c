use assert_matches::assert_matches;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::SupabaseClient;
use shared_models::RemoteError;
use shared_utils::test_utils::TestConfig;

async fn client_for(server: &MockServer) -> SupabaseClient {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = server.uri();
    SupabaseClient::new(&config)
}

#[tokio::test]
async fn test_invoke_function_sends_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/consultation-session"))
        .and(header("apikey", "test-anon-key"))
        .and(header("authorization", "Bearer user-token"))
        .and(body_json(json!({"action": "sync"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let result: Value = client
        .invoke_function("consultation-session", "user-token", json!({"action": "sync"}))
        .await
        .expect("function call should succeed");

    assert_eq!(result["ok"], true);
}

#[tokio::test]
async fn test_unauthorized_status_maps_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("JWT expired"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let result: Result<Value, _> = client
        .invoke_function("consultation-session", "stale", json!({}))
        .await;

    assert_matches!(result, Err(RemoteError::Unauthorized(_)));
}

#[tokio::test]
async fn test_application_error_carries_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "Extension already requested",
            "code": "extension_pending"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let result: Result<Value, _> = client
        .invoke_function("consultation-session", "token", json!({}))
        .await;

    assert_matches!(result, Err(RemoteError::Application { code, .. }) if code == "extension_pending");
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = "http://127.0.0.1:9".to_string();
    let client = SupabaseClient::new(&config);

    let result: Result<Value, _> = client
        .invoke_function("consultation-session", "token", json!({}))
        .await;

    assert_matches!(result, Err(RemoteError::Network(_)));
}

#[tokio::test]
async fn test_insert_asks_postgrest_to_ignore_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/chat_messages"))
        .and(header("prefer", "resolution=ignore-duplicates,return=minimal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .insert_ignoring_duplicates("chat_messages", "token", json!({"id": "m-1"}))
        .await
        .expect("insert should succeed");
}
