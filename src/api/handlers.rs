//! 路由处理函数

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::OverBudgetStrategy;
use crate::workflow::{WorkflowEvent, WorkflowMode};

use super::{ApiError, AppState};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";
const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    #[serde(default, rename = "sessionId", alias = "session_id")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default, rename = "sessionId", alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default, rename = "messageId", alias = "message_id")]
    pub message_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PlaybackDoneRequest {
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowQuery {
    pub mode: Option<String>,
}

/// 按消息预算处理入站文本
fn apply_budget(message: &str, limit: usize, strategy: OverBudgetStrategy) -> Result<String, ApiError> {
    let actual = message.chars().count();
    if actual <= limit {
        return Ok(message.to_string());
    }
    match strategy {
        OverBudgetStrategy::Reject => Err(ApiError::PayloadTooLarge { limit, actual }),
        OverBudgetStrategy::Truncate => {
            tracing::warn!(actual, limit, "Inbound message over budget, truncating");
            Ok(message.chars().take(limit).collect())
        }
    }
}

fn ndjson_line(event: &WorkflowEvent) -> Bytes {
    let mut line = serde_json::to_string(event).unwrap_or_else(|e| {
        json!({ "type": "workflow_error", "data": { "error": e.to_string() } }).to_string()
    });
    line.push('\n');
    Bytes::from(line)
}

/// POST /chat/stream：执行工作流，以 NDJSON 逐条推送事件，终止事件后关闭
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("message is required".to_string()))?;
    let message = apply_budget(
        &message,
        state.config.server.max_message_chars,
        state.config.server.over_budget,
    )?;
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());

    let mut session = state.sessions.checkout(&session_id).await?;
    tracing::info!(session = %session_id, chars = message.chars().count(), "Accepted chat request");

    let (tx, rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let watch_tx = tx.clone();
    let engine = Arc::clone(&state.engine);
    let sessions = Arc::clone(&state.sessions);
    let run = tokio::spawn(async move {
        engine.execute_request(&mut session, &message, &tx).await;
        // 先归还会话再关闭通道，客户端收到流结束后即可发起下一次请求
        sessions.checkin(session).await;
        drop(tx);
    });

    // 运行任务异常退出时会话已丢失：丢弃该键并补发终止事件
    let sessions = Arc::clone(&state.sessions);
    tokio::spawn(async move {
        if let Err(e) = run.await {
            tracing::error!(session = %session_id, "Workflow task failed: {}", e);
            sessions.discard(&session_id).await;
            let _ = watch_tx.send(WorkflowEvent::internal_error(
                &session_id,
                format!("workflow task failed: {}", e),
            ));
        }
    });

    // 引擎总会先发终止事件再返回，通道关闭即结束响应
    let body = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        if event.is_terminal() {
            tracing::debug!("Terminal event streamed");
        }
        Some((Ok::<_, Infallible>(ndjson_line(&event)), rx))
    });

    let mut response = Response::new(Body::from_stream(body));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
    Ok(response)
}

/// POST /chat/confirm：前端送达确认
pub async fn chat_confirm(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session_id = req
        .session_id
        .ok_or_else(|| ApiError::BadRequest("sessionId is required".to_string()))?;
    let message_id = req
        .message_id
        .ok_or_else(|| ApiError::BadRequest("messageId is required".to_string()))?;
    state.sessions.confirm(&session_id, message_id).await?;
    Ok(Json(json!({ "success": true, "sessionId": session_id, "messageId": message_id })))
}

/// POST /tts/completed：播放端回报某个语音播放完毕
pub async fn tts_completed(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PlaybackDoneRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let voice = req
        .voice
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("voice is required".to_string()))?;
    let resolved = state.speech.complete(&voice).await;
    if !resolved {
        tracing::debug!(voice = %voice, "Playback completion with no outstanding ticket");
    }
    Ok(Json(json!({ "success": true, "voice": voice, "resolved": resolved })))
}

/// GET /tts/pending：取走待播放通知
pub async fn tts_pending(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending = state.speech.take_pending().await;
    Json(json!({ "has_pending": pending.is_some(), "request": pending }))
}

/// GET /workflow：阶段表与生效的工作流参数
pub async fn workflow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkflowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let modes = match query.mode.as_deref() {
        Some(mode) => vec![WorkflowMode::parse(mode)?],
        None => vec![WorkflowMode::Task, WorkflowMode::Chat],
    };
    let pipelines: Vec<_> = modes.into_iter().map(|m| state.engine.pipeline(m)).collect();
    let settings = state.engine.settings();
    Ok(Json(json!({
        "pipelines": pipelines,
        "settings": {
            "max_cycles": settings.max_cycles,
            "stage_timeout_secs": settings.stage_timeout.as_secs(),
            "strict_agent_order": settings.strict_agent_order,
            "speech_enabled": settings.speech_enabled,
            "mode_selection": settings.mode_selection,
            "chat_stickiness": settings.chat_stickiness,
        }
    })))
}

pub async fn agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "agents": state.engine.roster().roster() }))
}

pub async fn session_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .snapshot(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session not found: {}", id)))
}

pub async fn last_analysis(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.evaluator.last_analysis().await)
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.sessions.len().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "active_sessions": active,
        })),
    )
}
