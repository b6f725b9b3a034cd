//! 工作流流式事件：每个事件序列化为一行 NDJSON `{type, data}`

use serde::Serialize;
use tokio::sync::mpsc;

use crate::agents::AgentId;
use crate::session::Turn;

use super::types::{CompletionReason, StageFailure, WorkflowMode};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// 某个 Agent 的回复已追加到历史
    AgentMessage {
        agent: AgentId,
        signature: String,
        stage: String,
        ordinal: u32,
        content: String,
        message_id: u64,
        timestamp: i64,
        provider: String,
        voice: Option<String>,
        retry_cycle: u32,
    },
    /// 验证失败，开始新的重试周期
    RetryCycleStarted {
        cycle: u32,
        max_cycles: u32,
        resume_after: u32,
    },
    WorkflowCompleted {
        session_id: String,
        success: bool,
        reason: CompletionReason,
        mode: WorkflowMode,
        retry_cycle: u32,
    },
    WorkflowError {
        session_id: String,
        agent: Option<AgentId>,
        ordinal: Option<u32>,
        stage: Option<String>,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn agent_message(turn: &Turn, signature: &str, voice: Option<&str>, retry_cycle: u32) -> Self {
        WorkflowEvent::AgentMessage {
            agent: turn.agent,
            signature: signature.to_string(),
            stage: turn.stage.clone(),
            ordinal: turn.ordinal,
            content: turn.content.clone(),
            message_id: turn.message_id,
            timestamp: turn.timestamp,
            provider: turn.provider.clone(),
            voice: voice.map(str::to_string),
            retry_cycle,
        }
    }

    pub fn stage_failed(session_id: &str, failure: &StageFailure) -> Self {
        WorkflowEvent::WorkflowError {
            session_id: session_id.to_string(),
            agent: Some(failure.agent),
            ordinal: Some(failure.ordinal),
            stage: Some(failure.stage.clone()),
            error: failure.to_string(),
        }
    }

    /// 与具体阶段无关的错误（例如引擎任务异常退出）
    pub fn internal_error(session_id: &str, error: impl Into<String>) -> Self {
        WorkflowEvent::WorkflowError {
            session_id: session_id.to_string(),
            agent: None,
            ordinal: None,
            stage: None,
            error: error.into(),
        }
    }

    /// 流在该事件之后结束
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowCompleted { .. } | WorkflowEvent::WorkflowError { .. }
        )
    }
}

pub type EventSender = mpsc::UnboundedSender<WorkflowEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<WorkflowEvent>;
