//! Scanner HTTP clients against mocked upstream APIs

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use fastskill_moderation::core::Verdict;
use fastskill_moderation::scanners::{
    parse_judgement, FileReputationApi, LlmJudgeApi, OpenAiJudgeClient, RetryPolicy, ScannerError,
    VirusTotalClient,
};
use fastskill_moderation::test_utils::judgement_json;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHA: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

fn vt_report(malicious: u32, suspicious: u32, harmless: u32) -> serde_json::Value {
    json!({
        "data": {
            "id": SHA,
            "type": "file",
            "attributes": {
                "last_analysis_stats": {
                    "malicious": malicious,
                    "suspicious": suspicious,
                    "harmless": harmless,
                    "undetected": 60,
                    "timeout": 0
                }
            }
        }
    })
}

#[tokio::test]
async fn test_virustotal_lookup_maps_stats_to_verdict() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .and(header("x-apikey", "vt-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vt_report(3, 0, 10)))
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(server.uri(), "vt-key".to_string());
    let report = client.lookup(SHA).await.unwrap().unwrap();
    assert_eq!(report.verdict, Verdict::Malicious);
    assert!(report.analysis_complete);
    assert_eq!(report.stats.malicious, 3);
    assert!(report.evidence().contains("3 malicious"));
}

#[tokio::test]
async fn test_virustotal_thresholds_are_respected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vt_report(1, 2, 10)))
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(server.uri(), "vt-key".to_string()).with_thresholds(2, 2);
    let report = client.lookup(SHA).await.unwrap().unwrap();
    assert_eq!(report.verdict, Verdict::Suspicious);
}

#[tokio::test]
async fn test_virustotal_unknown_file_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "NotFoundError", "message": "File not found" }
        })))
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(server.uri(), "vt-key".to_string());
    assert!(client.lookup(SHA).await.unwrap().is_none());
}

#[tokio::test]
async fn test_virustotal_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(server.uri(), "vt-key".to_string());
    match client.lookup(SHA).await.unwrap_err() {
        ScannerError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, Some(7)),
        other => panic!("expected rate limit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_policy_recovers_from_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vt_report(0, 0, 12)))
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(server.uri(), "vt-key".to_string());
    let report = RetryPolicy::immediate(3)
        .run("lookup", || client.lookup(SHA))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.verdict, Verdict::Clean);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_virustotal_upload_and_reanalysis() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/files"))
        .and(header("x-apikey", "vt-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "type": "analysis", "id": "abc" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/files/{}/analyse", SHA)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "type": "analysis", "id": "def" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(format!("{}/", server.uri()), "vt-key".to_string());
    client
        .upload("bundle.zip", b"PK\x05\x06".to_vec())
        .await
        .unwrap();
    client.request_reanalysis(SHA).await.unwrap();
}

#[tokio::test]
async fn test_virustotal_rejected_key_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/files/{}", SHA)))
        .respond_with(ResponseTemplate::new(401).set_body_string("WrongCredentialsError"))
        .mount(&server)
        .await;

    let client = VirusTotalClient::new(server.uri(), "bad".to_string());
    let err = RetryPolicy::immediate(3)
        .run("lookup", || client.lookup(SHA))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

fn chat_completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_openai_judge_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer llm-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_completion(&judgement_json(Verdict::Malicious))),
        )
        .mount(&server)
        .await;

    let client = OpenAiJudgeClient::new(server.uri(), "gpt-test".to_string(), "llm-key".to_string());
    assert_eq!(client.model(), "gpt-test");
    let raw = client.judge("system prompt", "skill prompt").await.unwrap();
    let judgement = parse_judgement(&raw).unwrap();
    assert_eq!(judgement.verdict, Verdict::Malicious);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "skill prompt");
    assert_eq!(body["response_format"]["type"], "json_object");
}

#[tokio::test]
async fn test_openai_judge_error_classes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("context_length_exceeded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = OpenAiJudgeClient::new(server.uri(), "gpt-test".to_string(), "llm-key".to_string());
    let rejected = client.judge("s", "p").await.unwrap_err();
    assert!(matches!(rejected, ScannerError::Rejected { status: 400, .. }));
    assert!(!rejected.is_retryable());

    let unavailable = client.judge("s", "p").await.unwrap_err();
    assert!(matches!(unavailable, ScannerError::Server { status: 503, .. }));
    assert!(unavailable.is_retryable());
}

#[tokio::test]
async fn test_openai_judge_without_content_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = OpenAiJudgeClient::new(server.uri(), "gpt-test".to_string(), "llm-key".to_string());
    assert!(matches!(
        client.judge("s", "p").await.unwrap_err(),
        ScannerError::Parse(_)
    ));
}
