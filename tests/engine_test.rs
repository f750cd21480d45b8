use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ooxml_translator::engine::{EngineSettings, RetryPolicy};
use ooxml_translator::events::{EventSink, Stage};
use ooxml_translator::{
    BatchTranslator, ErrorKind, LlmEngine, TranslationCache, TranslationEngine,
};

fn settings(server: &MockServer, cjk_only: bool, max_attempts: u32) -> EngineSettings {
    EngineSettings {
        base_url: format!("{}/v1", server.uri()),
        api_key: "sk-test".into(),
        model: "test-model".into(),
        prompt: "Translate to English.".into(),
        cjk_only,
        request_timeout: Duration::from_secs(10),
        retry: RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(5),
        },
    }
}

fn engine(server: &MockServer, cjk_only: bool, max_attempts: u32) -> LlmEngine {
    LlmEngine::new(
        settings(server, cjk_only, max_attempts),
        Arc::new(TranslationCache::new()),
    )
    .expect("engine")
}

fn completion(content: &str) -> serde_json::Value {
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

fn sse(parts: &[&str]) -> String {
    let mut body = String::new();
    for p in parts {
        let chunk = json!({ "choices": [{ "index": 0, "delta": { "content": p } }] });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn same_text_twice_hits_backend_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Hello \n")))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server, true, 3);
    let cancel = CancellationToken::new();
    assert_eq!(engine.translate(&cancel, "こんにちは").await.expect("first"), "Hello");
    assert_eq!(engine.translate(&cancel, "こんにちは").await.expect("second"), "Hello");
    assert_eq!(engine.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_fragments_in_one_batch_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("Total"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = Arc::new(engine(&server, true, 3));
    let batches = BatchTranslator::new(
        engine.clone(),
        5,
        EventSink::disabled(),
        Duration::from_millis(500),
    );
    let out = batches
        .translate_batch(
            Stage::Cell,
            "xl/sharedStrings.xml",
            vec!["合計".to_string(); 5],
            &CancellationToken::new(),
        )
        .await
        .expect("batch");
    assert_eq!(out, vec!["Total"; 5]);
    assert_eq!(engine.cache().len(), 1);
}

#[tokio::test]
async fn request_carries_prompt_text_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": false,
            "metadata": { "enable_thinking": "false" },
            "messages": [
                { "role": "system", "content": "Translate to English." },
                { "role": "user", "content": "東京" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Tokyo")))
        .expect(1)
        .mount(&server)
        .await;

    let out = engine(&server, false, 1)
        .translate(&CancellationToken::new(), "東京")
        .await
        .expect("translate");
    assert_eq!(out, "Tokyo");
}

#[tokio::test]
async fn non_cjk_text_never_reaches_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let out = engine(&server, true, 3)
        .translate(&CancellationToken::new(), "Hello")
        .await
        .expect("gated");
    assert_eq!(out, "Hello");
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hello")))
        .expect(1)
        .mount(&server)
        .await;

    let out = engine(&server, true, 3)
        .translate(&CancellationToken::new(), "こんにちは")
        .await
        .expect("third attempt succeeds");
    assert_eq!(out, "Hello");
}

#[tokio::test]
async fn exhausted_retries_are_engine_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let engine = engine(&server, true, 2);
    let err = engine
        .translate(&CancellationToken::new(), "こんにちは")
        .await
        .err()
        .expect("must fail");
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn empty_choices_are_engine_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let err = engine(&server, true, 1)
        .translate(&CancellationToken::new(), "こんにちは")
        .await
        .err()
        .expect("must fail");
    assert!(err.is_engine());
}

#[tokio::test]
async fn stream_only_backend_switches_model_to_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "This model only support stream mode, please enable the stream parameter" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["Hel", "lo", " "]), "text/event-stream"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let engine = engine(&server, true, 3);
    let cancel = CancellationToken::new();
    assert_eq!(engine.translate(&cancel, "こんにちは").await.expect("first"), "Hello");
    // Different text, so not cached; goes straight to the streamed endpoint.
    assert_eq!(engine.translate(&cancel, "こんばんは").await.expect("second"), "Hello");
}

#[tokio::test]
async fn empty_stream_is_an_engine_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(400).set_body_string("only support stream mode"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&[]), "text/event-stream"))
        .mount(&server)
        .await;

    let err = engine(&server, true, 1)
        .translate(&CancellationToken::new(), "こんにちは")
        .await
        .err()
        .expect("must fail");
    assert!(err.is_engine());
}

#[tokio::test]
async fn cancellation_interrupts_a_slow_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let engine = engine(&server, true, 3);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = engine
        .translate(&cancel, "こんにちは")
        .await
        .err()
        .expect("cancelled");
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));
}
