//! 运行时 WebSocket 协议帧

use serde::{Deserialize, Serialize};

/// 客户端发往运行时的帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 用户消息
    Message {
        content: String,
        session_id: String,
        /// 毫秒时间戳
        timestamp: i64,
    },
    /// 对 tool_request 的合成应答
    ToolResponse {
        tool_call_id: String,
        content: String,
        success: bool,
    },
}

/// 运行时推送的事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// 流式文本片段
    Response {
        #[serde(default)]
        content: Option<String>,
    },
    /// 运行时请求调用工具
    ToolRequest {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default, alias = "name")]
        tool_name: Option<String>,
    },
    Complete,
    Cancelled,
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// 未识别的事件类型（忽略）
    #[serde(other)]
    Unknown,
}

impl RuntimeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeEvent::Response { .. } => "response",
            RuntimeEvent::ToolRequest { .. } => "tool_request",
            RuntimeEvent::Complete => "complete",
            RuntimeEvent::Cancelled => "cancelled",
            RuntimeEvent::Error { .. } => "error",
            RuntimeEvent::Unknown => "unknown",
        }
    }
}
