//! 远端 Agent 运行时客户端
//!
//! 每次派发打开一条独立的 WebSocket 连接与子会话，收集流式文本直到 complete / cancelled，
//! 期间对 tool_request 做即时的可用性应答。这一层不生成任何替代文本：空结果即失败。

pub mod client;
pub mod mock;
pub mod protocol;

use async_trait::async_trait;
use serde::Serialize;

use crate::agents::AgentId;

pub use client::{truncate_prompt, RuntimeSettings, WebSocketDispatcher};
pub use mock::{MockDispatcher, MockReply};
pub use protocol::{ClientFrame, RuntimeEvent};

/// 一次派发请求
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRequest {
    pub agent: AgentId,
    pub system_prompt: String,
    pub user_prompt: String,
    /// 基础会话键；客户端会在其后追加随机后缀作为子会话
    pub session_key: String,
    pub enable_tools: bool,
}

impl DispatchRequest {
    /// 发送给运行时的完整提示词（截断前）
    pub fn composed_prompt(&self) -> String {
        if self.system_prompt.is_empty() {
            self.user_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, self.user_prompt)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid runtime endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("failed to connect to runtime: {0}")]
    Connect(String),
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("connection error: {0}")]
    Transport(String),
    #[error("runtime reported error: {0}")]
    Remote(String),
    #[error("runtime returned an empty response")]
    EmptyResponse,
}

/// Agent 派发抽象：WebSocket 运行时与测试替身都实现它
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<String, DispatchError>;

    /// 记录在 Turn 上的提供方名称
    fn provider(&self) -> &str;
}
