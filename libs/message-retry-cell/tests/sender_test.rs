use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use message_retry_cell::*;
use shared_models::RemoteError;
use shared_utils::test_utils::TestConfig;

fn sender_for(server: &MockServer) -> SupabaseMessageSender {
    let config = TestConfig {
        supabase_url: server.uri(),
        ..TestConfig::default()
    };
    SupabaseMessageSender::new(&config.to_app_config())
}

#[tokio::test]
async fn test_send_inserts_row_keyed_by_message_id() {
    let server = MockServer::start().await;
    let message = OutboundMessage::text("c-1", "u-1", "hello");

    Mock::given(method("POST"))
        .and(path("/rest/v1/chat_messages"))
        .and(header("Prefer", "resolution=ignore-duplicates,return=minimal"))
        .and(body_partial_json(json!({
            "id": message.message_id,
            "consultation_id": "c-1",
            "sender_id": "u-1",
            "content": "hello",
            "message_type": "text"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    assert!(sender_for(&server).send_message(&message).await.is_ok());
}

#[tokio::test]
async fn test_server_rejection_is_an_application_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/chat_messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "23503",
            "message": "consultation does not exist"
        })))
        .mount(&server)
        .await;

    let result = sender_for(&server)
        .send_message(&OutboundMessage::text("c-404", "u-1", "hello"))
        .await;

    assert_matches!(result, Err(RemoteError::Application { code, .. }) if code == "23503");
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("JWT expired"))
        .mount(&server)
        .await;

    let result = sender_for(&server)
        .send_message(&OutboundMessage::text("c-1", "u-1", "hello"))
        .await;

    assert_matches!(result, Err(RemoteError::Unauthorized(_)));
}
