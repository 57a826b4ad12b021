use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sonoma_web::assistant::{AssistantClient, BridgeError};
use sonoma_web::config::Config;

fn test_config(api_base: String) -> Config {
    let mut assistants = HashMap::new();
    assistants.insert("Sonoma".to_string(), "asst_123".to_string());
    Config {
        api_key: "test-key".to_string(),
        api_base,
        assistants,
        poll_interval: Duration::from_millis(5),
        poll_timeout: Duration::from_millis(500),
    }
}

async fn mount_thread_and_message(server: &MockServer, prompt: &str) {
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "thread_1", "object": "thread"})),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .and(body_json(json!({"role": "user", "content": prompt})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_user",
            "role": "user",
            "content": [{"type": "text", "text": {"value": prompt, "annotations": []}}]
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_run_create(server: &MockServer, status: &str) {
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .and(body_json(json!({"assistant_id": "asst_123"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "run_1", "status": status})),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn respond_polls_until_the_run_completes() {
    let server = MockServer::start().await;
    mount_thread_and_message(&server, "hello").await;
    mount_run_create(&server, "queued").await;

    // Two in-flight polls before the run settles.
    Mock::given(method("GET"))
        .and(path("/threads/thread_1/runs/run_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "run_1", "status": "in_progress"})),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/thread_1/runs/run_1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "run_1", "status": "completed"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/threads/thread_1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {
                    "id": "msg_assistant",
                    "role": "assistant",
                    "content": [{"type": "text", "text": {"value": "**Hi** there", "annotations": []}}]
                },
                {
                    "id": "msg_user",
                    "role": "user",
                    "content": [{"type": "text", "text": {"value": "hello", "annotations": []}}]
                }
            ],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AssistantClient::new(&test_config(server.uri()));
    let chunks = client.respond("Sonoma", "hello").await.unwrap();

    // Only the assistant-role message surfaces, already formatted.
    assert_eq!(chunks, vec!["<strong>Hi</strong> there".to_string()]);
}

#[tokio::test]
async fn unusual_content_shapes_still_produce_a_chunk() {
    let server = MockServer::start().await;
    mount_thread_and_message(&server, "hello").await;
    mount_run_create(&server, "completed").await;

    // Content as a bare value object rather than the usual block list.
    Mock::given(method("GET"))
        .and(path("/threads/thread_1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                { "role": "assistant", "content": { "value": "direct" } }
            ],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AssistantClient::new(&test_config(server.uri()));
    let chunks = client.respond("Sonoma", "hello").await.unwrap();
    assert_eq!(chunks, vec!["direct".to_string()]);
}

#[tokio::test]
async fn requests_carry_credential_and_beta_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("OpenAI-Beta", "assistants=v2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let client = AssistantClient::new(&test_config(server.uri()));
    // The 500 ends the exchange, but reaching it proves the headers matched.
    let err = client.respond("Sonoma", "hello").await.unwrap_err();
    assert!(matches!(err, BridgeError::Api { .. }));
}

#[tokio::test]
async fn failed_run_is_an_error_not_an_endless_poll() {
    let server = MockServer::start().await;
    mount_thread_and_message(&server, "hello").await;
    mount_run_create(&server, "queued").await;

    Mock::given(method("GET"))
        .and(path("/threads/thread_1/runs/run_1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "run_1", "status": "failed"})),
        )
        .mount(&server)
        .await;

    let client = AssistantClient::new(&test_config(server.uri()));
    let err = client.respond("Sonoma", "hello").await.unwrap_err();
    match err {
        BridgeError::RunNotCompleted { run_id, status } => {
            assert_eq!(run_id, "run_1");
            assert_eq!(status.to_string(), "failed");
        }
        other => panic!("expected RunNotCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn polling_gives_up_after_the_configured_timeout() {
    let server = MockServer::start().await;
    mount_thread_and_message(&server, "hello").await;
    mount_run_create(&server, "queued").await;

    // The run never leaves in_progress.
    Mock::given(method("GET"))
        .and(path("/threads/thread_1/runs/run_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "run_1", "status": "in_progress"})),
        )
        .mount(&server)
        .await;

    let mut config = test_config(server.uri());
    config.poll_timeout = Duration::from_millis(50);
    let client = AssistantClient::new(&config);

    let err = client.respond("Sonoma", "hello").await.unwrap_err();
    assert!(matches!(err, BridgeError::PollTimeout { .. }));
}

#[tokio::test]
async fn unknown_assistant_name_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let client = AssistantClient::new(&test_config(server.uri()));

    let err = client.respond("Nonexistent", "hello").await.unwrap_err();
    match err {
        BridgeError::UnknownAssistant(name) => assert_eq!(name, "Nonexistent"),
        other => panic!("expected UnknownAssistant, got {:?}", other),
    }
    // No requests reached the mock server.
    assert!(server.received_requests().await.unwrap().is_empty());
}
