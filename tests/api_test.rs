//! HTTP 接口集成测试：用 Mock 派发器 / 分类器 / 合成器装配路由，逐个端点走一遍

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use atlas::agents::AgentId;
use atlas::api::{build_router, AppState};
use atlas::config::{AppConfig, OverBudgetStrategy};
use atlas::llm::MockLlmClient;
use atlas::runtime::{MockDispatcher, MockReply};
use atlas::speech::MockSynthesizer;

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.workflow.mode_selection = false;
    cfg.workflow.display_pause_ms = 0;
    cfg.workflow.stage_timeout_secs = 5;
    cfg.speech.enabled = false;
    cfg
}

fn happy_dispatcher() -> MockDispatcher {
    MockDispatcher::new()
        .reply(AgentId::Coordinator, "Plan: create notes.txt.")
        .reply(AgentId::Executor, "Created notes.txt successfully.")
        .reply(AgentId::Verifier, "Confirmed: notes.txt exists.")
}

fn setup_with(cfg: AppConfig, dispatcher: MockDispatcher) -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(
        AppState::new(
            cfg,
            Arc::new(dispatcher),
            Arc::new(MockLlmClient::failing()),
            Arc::new(MockSynthesizer::succeeding()),
        )
        .unwrap(),
    );
    (build_router(state.clone()), state)
}

fn setup() -> (axum::Router, Arc<AppState>) {
    setup_with(config(), happy_dispatcher())
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_string(resp).await).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn ndjson(text: &str) -> Vec<serde_json::Value> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup();
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_sessions"], 0);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_chat_stream_emits_ndjson_until_completion() {
    let (app, _) = setup();
    let resp = app
        .clone()
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "create notes.txt", "sessionId": "s1" }),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/x-ndjson"));

    let events = ndjson(&body_string(resp).await);
    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        vec!["agent_message", "agent_message", "agent_message", "workflow_completed"]
    );
    assert_eq!(events[0]["data"]["agent"], "coordinator");
    assert_eq!(events[1]["data"]["stage"], "execution");
    assert_eq!(events[3]["data"]["success"], true);
    assert_eq!(events[3]["data"]["session_id"], "s1");

    // 流结束时会话已归还
    let resp = app
        .oneshot(Request::get("/sessions/s1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let snapshot = body_json(resp).await;
    assert_eq!(snapshot["running"], false);
    assert_eq!(snapshot["original_message"], "create notes.txt");
    assert_eq!(snapshot["verified"], "passed");
    // RFC 3339 时间戳
    let created = snapshot["created_at"].as_str().unwrap();
    assert!(created.parse::<chrono::DateTime<chrono::Utc>>().is_ok(), "created_at: {}", created);
}

#[tokio::test]
async fn test_chat_stream_defaults_session_id() {
    let (app, state) = setup();
    let resp = app
        .oneshot(post_json("/chat/stream", serde_json::json!({ "message": "go" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let _ = body_string(resp).await;
    assert!(state.sessions.snapshot("default").await.is_some());
}

#[tokio::test]
async fn test_chat_stream_rejects_missing_message() {
    let (app, _) = setup();
    for body in [serde_json::json!({}), serde_json::json!({ "message": "   " })] {
        let resp = app.clone().oneshot(post_json("/chat/stream", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("message"));
    }
}

#[tokio::test]
async fn test_chat_stream_over_budget_rejected() {
    let mut cfg = config();
    cfg.server.max_message_chars = 10;
    let (app, _) = setup_with(cfg, happy_dispatcher());
    let resp = app
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "this message is far too long" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_chat_stream_over_budget_truncated() {
    let mut cfg = config();
    cfg.server.max_message_chars = 10;
    cfg.server.over_budget = OverBudgetStrategy::Truncate;
    let (app, state) = setup_with(cfg, happy_dispatcher());
    let resp = app
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "this message is far too long", "sessionId": "t" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let _ = body_string(resp).await;
    let snapshot = state.sessions.snapshot("t").await.unwrap();
    assert_eq!(snapshot.original_message, "this messa");
}

#[tokio::test]
async fn test_concurrent_run_on_same_session_conflicts() {
    let dispatcher = MockDispatcher::new()
        .script(
            AgentId::Coordinator,
            MockReply::Delayed(Duration::from_millis(300), "Plan: wait.".to_string()),
        )
        .reply(AgentId::Executor, "Done.")
        .reply(AgentId::Verifier, "Verified.");
    let (app, _) = setup_with(config(), dispatcher);

    let first = app
        .clone()
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "slow task", "sessionId": "busy" }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "another", "sessionId": "busy" }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let events = ndjson(&body_string(first).await);
    assert_eq!(events.last().unwrap()["type"], "workflow_completed");

    // 第一次运行结束后可以再次提交
    let third = app
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "again", "sessionId": "busy" }),
        ))
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stage_failure_streams_workflow_error() {
    let dispatcher = MockDispatcher::new()
        .reply(AgentId::Coordinator, "Plan.")
        .script(AgentId::Executor, MockReply::Error("runtime crashed".to_string()));
    let (app, _) = setup_with(config(), dispatcher);
    let resp = app
        .oneshot(post_json("/chat/stream", serde_json::json!({ "message": "do it" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let events = ndjson(&body_string(resp).await);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "workflow_error");
    assert_eq!(last["data"]["agent"], "executor");
    assert!(last["data"]["error"].as_str().unwrap().contains("runtime crashed"));
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let (app, _) = setup();
    let resp = app
        .clone()
        .oneshot(Request::get("/sessions/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(post_json(
            "/chat/confirm",
            serde_json::json!({ "sessionId": "nope", "messageId": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_records_last_delivered_message() {
    let (app, state) = setup();
    let resp = app
        .clone()
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "create notes.txt", "sessionId": "c" }),
        ))
        .await
        .unwrap();
    let events = ndjson(&body_string(resp).await);
    let message_id = events[0]["data"]["message_id"].as_u64().unwrap();

    let resp = app
        .oneshot(post_json(
            "/chat/confirm",
            serde_json::json!({ "sessionId": "c", "messageId": message_id }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let snapshot = state.sessions.snapshot("c").await.unwrap();
    assert_eq!(snapshot.last_confirmed_message, Some(message_id));
}

#[tokio::test]
async fn test_tts_completed_requires_voice() {
    let (app, _) = setup();
    let resp = app
        .clone()
        .oneshot(post_json("/tts/completed", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(post_json("/tts/completed", serde_json::json!({ "voice": "lada" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["voice"], "lada");
    assert_eq!(json["resolved"], false);
}

#[tokio::test]
async fn test_tts_pending_and_completion_resolve_waiter() {
    let (app, state) = setup();
    let resp = app
        .clone()
        .oneshot(Request::get("/tts/pending").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["has_pending"], false);

    let waiter = {
        let speech = state.speech.clone();
        tokio::spawn(async move { speech.speak_and_wait("hello", "mykyta").await })
    };
    while state.speech.outstanding().await == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resp = app
        .clone()
        .oneshot(Request::get("/tts/pending").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["has_pending"], true);
    assert_eq!(json["request"]["voice"], "mykyta");
    assert_eq!(json["request"]["text"], "hello");

    let resp = app
        .oneshot(post_json("/tts/completed", serde_json::json!({ "voice": "mykyta" })))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["resolved"], true);
    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn test_workflow_introspection() {
    let (app, _) = setup();
    let resp = app
        .clone()
        .oneshot(Request::get("/workflow").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["pipelines"].as_array().unwrap().len(), 2);
    assert_eq!(json["pipelines"][0]["stages"].as_array().unwrap().len(), 8);
    assert_eq!(json["settings"]["max_cycles"], 3);

    let resp = app
        .clone()
        .oneshot(Request::get("/workflow?mode=chat").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["pipelines"].as_array().unwrap().len(), 1);
    assert_eq!(json["pipelines"][0]["mode"], "chat");

    let resp = app
        .oneshot(Request::get("/workflow?mode=bogus").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agents_roster() {
    let (app, _) = setup();
    let resp = app
        .oneshot(Request::get("/agents").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let ids: Vec<&str> = json["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["coordinator", "executor", "verifier"]);
}

#[tokio::test]
async fn test_last_analysis_is_null_until_evaluated() {
    let (app, _) = setup();
    let resp = app
        .clone()
        .oneshot(Request::get("/analysis/last").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(resp).await, serde_json::Value::Null);

    let resp = app
        .clone()
        .oneshot(post_json("/chat/stream", serde_json::json!({ "message": "go" })))
        .await
        .unwrap();
    let _ = body_string(resp).await;

    let resp = app
        .oneshot(Request::get("/analysis/last").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["analysis"], "verification_check");
    assert_eq!(json["source"], "fallback");
    assert!(json["at"].as_str().unwrap().parse::<chrono::DateTime<chrono::Utc>>().is_ok());
}

#[tokio::test]
async fn test_shutdown_ends_stream_blocked_on_playback() {
    let mut cfg = config();
    cfg.speech.enabled = true;
    cfg.speech.playback_timeout_secs = 30;
    cfg.workflow.strict_agent_order = true;
    let (app, state) = setup_with(cfg, happy_dispatcher());

    let resp = app
        .oneshot(post_json(
            "/chat/stream",
            serde_json::json!({ "message": "create notes.txt", "sessionId": "stopping" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = tokio::spawn(body_string(resp));

    while state.speech.outstanding().await == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let started = std::time::Instant::now();
    state.begin_shutdown().await;

    let text = tokio::time::timeout(Duration::from_secs(1), body)
        .await
        .expect("stream must end promptly after shutdown")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    let events = ndjson(&text);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "workflow_error");
    assert!(last["data"]["error"].as_str().unwrap().contains("shutdown"));
    assert_eq!(state.speech.outstanding().await, 0);
}
