//! End-to-end pipeline tests: signed webhook body in, platform reply out.
//!
//! The agent backend and the messaging API are both served by one wiremock
//! server; sessions live in an in-memory SQLite database.

use std::sync::Arc;

use chatbridge_core::BridgeConfig;
use chatbridge_server::line::{sign, MessagingError};
use chatbridge_server::{build_bridge, Bridge};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SECRET: &str = "channel-secret";

fn config(server: &MockServer, variant: &str, extra: &str) -> BridgeConfig {
    let toml = format!(
        r#"
        [line]
        channel_access_token = "line-token"
        channel_secret = "{secret}"
        api_base = "{uri}"
        data_api_base = "{uri}"

        [agent]
        variant = "{variant}"

        [agents.default]
        api_key = "app-default"
        base_url = "{uri}/v1"
        user = "bridge-user"

        [agents.coach]
        api_key = "app-coach"
        base_url = "{uri}/v1"
        user = "bridge-user"
        display_name = "Coach"
        icon_url = "https://example.com/coach.png"

        {extra}
        "#,
        secret = SECRET,
        uri = server.uri(),
        variant = variant,
        extra = extra,
    );
    BridgeConfig::from_toml_str(&toml).unwrap()
}

async fn bridge(config: &BridgeConfig) -> Arc<Bridge> {
    let pool = chatbridge_core::db::memory_pool().await.unwrap();
    chatbridge_core::db::migrate(&pool).await.unwrap();
    Arc::new(build_bridge(config, pool).unwrap())
}

fn text_event(user_id: &str, reply_token: &str, text: &str) -> Value {
    json!({
        "type": "message",
        "timestamp": 1700000000000i64,
        "replyToken": reply_token,
        "source": {"type": "user", "userId": user_id},
        "message": {"id": format!("m-{}", reply_token), "type": "text", "text": text}
    })
}

fn signed(events: Vec<Value>) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&json!({"destination": "Ubot", "events": events})).unwrap();
    let signature = sign(SECRET, &body).unwrap();
    (body, signature)
}

async fn reply_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r: &&Request| r.url.path() == "/v2/bot/message/reply")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

async fn mount_reply_api(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/reply"))
        .and(header("authorization", "Bearer line-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_streaming_agent_round_trip() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;

    let sse = concat!(
        "data: {\"event\":\"message\",\"answer\":\"Hel\",\"conversation_id\":\"conv-1\"}\n\n",
        "data: {\"event\":\"agent_thought\",\"thought\":\"...\"}\n\n",
        "data: {\"event\":\"message\",\"answer\":\"lo\",\"conversation_id\":\"conv-1\"}\n\n",
        "data: {\"event\":\"message_end\",\"metadata\":{\"usage\":{\"total_tokens\":7}}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(header("authorization", "Bearer app-default"))
        .and(body_partial_json(json!({
            "query": "hi",
            "response_mode": "streaming",
            "user": "bridge-user",
            "auto_generate_name": false
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, "agent", "");
    let bridge = bridge(&config).await;

    let (body, signature) = signed(vec![text_event("U1", "rt-1", "hi")]);
    let processed = bridge.process_request(&body, &signature).await.unwrap();
    assert_eq!(processed, 1);

    let replies = reply_bodies(&server).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["replyToken"], "rt-1");
    assert_eq!(replies[0]["messages"][0]["type"], "text");
    assert_eq!(replies[0]["messages"][0]["text"], "Hello");

    let session = bridge.sessions().get("U1").await.unwrap();
    assert_eq!(session.conversation_id.as_deref(), Some("conv-1"));
}

#[tokio::test]
async fn test_continuity_token_sent_on_second_turn() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(body_partial_json(json!({"conversation_id": "conv-9"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversation_id": "conv-9",
            "answer": "second"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversation_id": "conv-9",
            "answer": "first"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, "chatbot", "");
    let bridge = bridge(&config).await;

    let (body, signature) = signed(vec![
        text_event("U1", "rt-1", "one"),
        text_event("U1", "rt-2", "two"),
    ]);
    bridge.process_request(&body, &signature).await.unwrap();

    let replies = reply_bodies(&server).await;
    let texts: Vec<&str> = replies
        .iter()
        .map(|r| r["messages"][0]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test]
async fn test_unsupported_variant_answers_with_error_reply() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config(&server, "workflow", "");
    let bridge = bridge(&config).await;

    let (body, signature) = signed(vec![text_event("U1", "rt-1", "hi")]);
    bridge.process_request(&body, &signature).await.unwrap();

    let replies = reply_bodies(&server).await;
    assert_eq!(replies.len(), 1);
    let text = replies[0]["messages"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Sorry"));
}

#[tokio::test]
async fn test_image_is_downloaded_uploaded_and_referenced() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;

    Mock::given(method("GET"))
        .and(path("/v2/bot/message/img-1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG\r\n".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/files/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "file-7"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(body_partial_json(json!({
            "query": ".",
            "files": [{"type": "image", "transfer_method": "local_file", "upload_file_id": "file-7"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "A cat."})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, "chatbot", "");
    let bridge = bridge(&config).await;

    let event = json!({
        "type": "message",
        "timestamp": 1,
        "replyToken": "rt-img",
        "source": {"type": "user", "userId": "U1"},
        "message": {"id": "img-1", "type": "image", "contentProvider": {"type": "line"}}
    });
    let (body, signature) = signed(vec![event]);
    bridge.process_request(&body, &signature).await.unwrap();

    let replies = reply_bodies(&server).await;
    assert_eq!(replies[0]["messages"][0]["text"], "A cat.");
}

#[tokio::test]
async fn test_agent_switch_then_persona_reply() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(header("authorization", "Bearer app-coach"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversation_id": "coach-1",
            "answer": "Drop and give me twenty."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(
        &server,
        "chatbot",
        "[agent_switch]\nenabled = true\ntrigger = \"switch agent\"",
    );
    let bridge = bridge(&config).await;

    let (body, signature) = signed(vec![
        text_event("U1", "rt-1", "switch agent"),
        text_event("U1", "rt-2", "coach"),
        text_event("U1", "rt-3", "motivate me"),
    ]);
    bridge.process_request(&body, &signature).await.unwrap();

    let replies = reply_bodies(&server).await;
    assert_eq!(replies.len(), 3);
    assert_eq!(
        replies[0]["messages"][0]["quickReply"]["items"][0]["action"]["text"],
        "coach"
    );
    assert_eq!(replies[1]["messages"][0]["text"], "Switched to 'Coach'.");
    assert_eq!(replies[2]["messages"][0]["text"], "Drop and give me twenty.");
    assert_eq!(replies[2]["messages"][0]["sender"]["name"], "Coach");
    assert_eq!(
        replies[2]["messages"][0]["sender"]["iconUrl"],
        "https://example.com/coach.png"
    );
}

#[tokio::test]
async fn test_non_message_events_get_no_reply() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;

    let config = config(&server, "chatbot", "");
    let bridge = bridge(&config).await;

    let (body, signature) = signed(vec![json!({
        "type": "follow",
        "timestamp": 1,
        "replyToken": "rt-f",
        "source": {"type": "user", "userId": "U1"}
    })]);
    assert_eq!(bridge.process_request(&body, &signature).await.unwrap(), 1);
    assert!(reply_bodies(&server).await.is_empty());
}

#[tokio::test]
async fn test_bad_signature_processes_nothing() {
    let server = MockServer::start().await;
    let config = config(&server, "chatbot", "");
    let bridge = bridge(&config).await;

    let (body, _) = signed(vec![text_event("U1", "rt-1", "hi")]);
    let err = bridge.process_request(&body, "bm90LXRoZS1zaWduYXR1cmU=").await.unwrap_err();
    assert!(matches!(err, MessagingError::InvalidSignature));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_same_user_deliveries_do_not_lose_updates() {
    let server = MockServer::start().await;
    mount_reply_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(50))
                .set_body_json(json!({"conversation_id": "conv-x", "answer": "ok"})),
        )
        .mount(&server)
        .await;

    let config = config(&server, "chatbot", "");
    let bridge = bridge(&config).await;

    let (first, sig_first) = signed(vec![text_event("U1", "rt-a", "a")]);
    let (second, sig_second) = signed(vec![text_event("U1", "rt-b", "b")]);
    let (a, b) = tokio::join!(
        bridge.process_request(&first, &sig_first),
        bridge.process_request(&second, &sig_second)
    );
    a.unwrap();
    b.unwrap();

    // With per-user serialization the second turn sees the first turn's token.
    let chat_bodies: Vec<Value> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/v1/chat-messages")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(chat_bodies.len(), 2);
    assert!(chat_bodies[0].get("conversation_id").is_none());
    assert_eq!(chat_bodies[1]["conversation_id"], "conv-x");
}
