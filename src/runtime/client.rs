//! WebSocket 派发客户端

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::config::RuntimeSection;

use super::protocol::{ClientFrame, RuntimeEvent};
use super::{AgentDispatcher, DispatchError, DispatchRequest};

/// 客户端设置（来自 [runtime] 段）
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub base_url: String,
    pub ws_path: String,
    pub api_key: Option<String>,
    pub prompt_budget_chars: usize,
    pub timeout: Duration,
    pub tool_prefixes: Vec<String>,
}

impl From<&RuntimeSection> for RuntimeSettings {
    fn from(cfg: &RuntimeSection) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            ws_path: cfg.ws_path.clone(),
            api_key: cfg.api_key.clone(),
            prompt_budget_chars: cfg.prompt_budget_chars,
            timeout: Duration::from_secs(cfg.timeout_secs),
            tool_prefixes: cfg.tool_prefixes.clone(),
        }
    }
}

impl RuntimeSettings {
    /// http(s):// 换成 ws(s)://，再拼上 ws_path
    pub fn ws_url(&self) -> Result<String, DispatchError> {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            return Err(DispatchError::InvalidEndpoint(self.base_url.clone()));
        };
        Ok(format!("{}{}", ws_base, self.ws_path))
    }

    pub fn tool_allowed(&self, tool_name: &str) -> bool {
        self.tool_prefixes
            .iter()
            .any(|prefix| tool_name.starts_with(prefix.as_str()))
    }
}

/// 超出预算时截断为 `budget - 3` 个字符加 "..."；预算内原样返回
pub fn truncate_prompt(prompt: &str, budget: usize) -> Cow<'_, str> {
    let len = prompt.chars().count();
    if len <= budget {
        return Cow::Borrowed(prompt);
    }
    let keep = budget.saturating_sub(3);
    let mut out: String = prompt.chars().take(keep).collect();
    out.push_str("...");
    tracing::info!(original = len, budget, "Prompt truncated before dispatch");
    Cow::Owned(out)
}

/// 子会话 ID：基础键 + 毫秒时间戳 + 9 位随机后缀
fn sub_session_id(base: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("{}_{}_{}", base, chrono::Utc::now().timestamp_millis(), suffix)
}

pub struct WebSocketDispatcher {
    settings: RuntimeSettings,
}

impl WebSocketDispatcher {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// 在已建立的双工连接上完成一次请求/响应交换
    pub async fn exchange<S>(
        &self,
        ws: &mut S,
        sub_session: &str,
        prompt: &str,
        enable_tools: bool,
    ) -> Result<String, DispatchError>
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
    {
        let frame = ClientFrame::Message {
            content: prompt.to_string(),
            session_id: sub_session.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        send_frame(ws, &frame).await?;

        let mut collected = String::new();
        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(
                        session = sub_session,
                        collected = collected.len(),
                        "Runtime exchange timed out after {:?}",
                        self.settings.timeout
                    );
                    break;
                }
                msg = ws.next() => {
                    let msg = match msg {
                        None => {
                            tracing::debug!(session = sub_session, "Runtime closed the stream");
                            break;
                        }
                        Some(Err(e)) => return Err(DispatchError::Transport(e.to_string())),
                        Some(Ok(msg)) => msg,
                    };
                    if msg.is_close() {
                        tracing::debug!(session = sub_session, "Runtime sent close frame");
                        break;
                    }
                    let text = match msg.to_text() {
                        Ok(t) if !t.is_empty() => t,
                        _ => continue,
                    };
                    let event: RuntimeEvent = match serde_json::from_str(text) {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::warn!(session = sub_session, "Unparseable runtime frame: {}", e);
                            continue;
                        }
                    };
                    tracing::trace!(session = sub_session, kind = event.kind(), "Runtime event");

                    match event {
                        RuntimeEvent::Response { content } => {
                            if let Some(chunk) = content {
                                collected.push_str(&chunk);
                            }
                        }
                        RuntimeEvent::ToolRequest { tool_call_id, id, tool_name } => {
                            let ack = self.tool_ack(tool_call_id, id, tool_name, enable_tools);
                            send_frame(ws, &ack).await?;
                        }
                        RuntimeEvent::Complete | RuntimeEvent::Cancelled => {
                            tracing::debug!(session = sub_session, collected = collected.len(), "Runtime exchange finished");
                            break;
                        }
                        RuntimeEvent::Error { error, message } => {
                            let cause = error.or(message).unwrap_or_else(|| "unknown error".to_string());
                            let _ = ws.close().await;
                            return Err(DispatchError::Remote(cause));
                        }
                        RuntimeEvent::Unknown => {}
                    }
                }
            }
        }

        let _ = ws.close().await;
        let text = collected.trim();
        if text.is_empty() {
            Err(DispatchError::EmptyResponse)
        } else {
            Ok(text.to_string())
        }
    }

    fn tool_ack(
        &self,
        tool_call_id: Option<String>,
        id: Option<String>,
        tool_name: Option<String>,
        enable_tools: bool,
    ) -> ClientFrame {
        let tool_call_id = tool_call_id
            .or(id)
            .unwrap_or_else(|| format!("fake_{}", chrono::Utc::now().timestamp_millis()));
        let name = tool_name.unwrap_or_else(|| "unknown".to_string());

        let (success, content) = if !enable_tools {
            (false, format!("Tool {} is not available: tools are disabled for this agent.", name))
        } else if self.settings.tool_allowed(&name) {
            (true, "Tool executed successfully".to_string())
        } else {
            (
                false,
                format!(
                    "Tool {} is not available. Available: {}.",
                    name,
                    self.settings.tool_prefixes.join(", ")
                ),
            )
        };

        tracing::info!(tool = %name, success, "Answered tool request");
        ClientFrame::ToolResponse {
            tool_call_id,
            content,
            success,
        }
    }
}

async fn send_frame<S>(ws: &mut S, frame: &ClientFrame) -> Result<(), DispatchError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(frame).map_err(|e| DispatchError::Send(e.to_string()))?;
    ws.send(WsMessage::text(json))
        .await
        .map_err(|e| DispatchError::Send(e.to_string()))
}

#[async_trait]
impl AgentDispatcher for WebSocketDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<String, DispatchError> {
        let url = self.settings.ws_url()?;
        let sub_session = sub_session_id(&request.session_key);
        let composed = request.composed_prompt();
        let prompt = truncate_prompt(&composed, self.settings.prompt_budget_chars);

        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|_| DispatchError::InvalidEndpoint(url.clone()))?;
        if let Some(key) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| DispatchError::Connect(e.to_string()))?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::info!(
            agent = %request.agent,
            session = %sub_session,
            chars = prompt.chars().count(),
            tools = request.enable_tools,
            "Dispatching to runtime at {}",
            url
        );

        let (mut ws, _) = tokio::time::timeout(
            self.settings.timeout,
            tokio_tungstenite::connect_async(ws_request),
        )
        .await
        .map_err(|_| DispatchError::Connect("connect timed out".to_string()))?
        .map_err(|e| DispatchError::Connect(e.to_string()))?;

        let result = self
            .exchange(&mut ws, &sub_session, &prompt, request.enable_tools)
            .await;
        match &result {
            Ok(text) => tracing::info!(agent = %request.agent, chars = text.len(), "Runtime dispatch succeeded"),
            Err(e) => tracing::warn!(agent = %request.agent, "Runtime dispatch failed: {}", e),
        }
        result
    }

    fn provider(&self) -> &str {
        "runtime"
    }
}
