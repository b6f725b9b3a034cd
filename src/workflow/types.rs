//! 工作流类型定义
//!
//! 阶段定义、运行输入 / 结果，以及工作流错误类型

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::AgentId;

use super::conditions::Condition;

/// 流水线变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// 单阶段闲聊回复
    Chat,
    /// 完整的 协调 → 执行 → 验证 流水线
    Task,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowMode::Chat => "chat",
            WorkflowMode::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Result<Self, WorkflowError> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(WorkflowMode::Chat),
            "task" => Ok(WorkflowMode::Task),
            other => Err(WorkflowError::UnknownPipeline(other.to_string())),
        }
    }
}

/// 静态阶段定义
#[derive(Debug, Clone, Serialize)]
pub struct StageDefinition {
    /// 在流水线内唯一且递增
    pub ordinal: u32,
    pub agent: AgentId,
    pub name: String,
    pub description: String,
    /// 必选阶段总是执行；可选阶段由 condition 决定
    pub required: bool,
    pub condition: Option<Condition>,
    /// 阶段内额外的派发尝试次数
    pub max_retries: u32,
    /// 该阶段输出可能的分类状态
    pub expected_states: Vec<String>,
    /// 完成流水线的终止阶段
    pub terminal: bool,
}

impl StageDefinition {
    pub fn required(ordinal: u32, agent: AgentId, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            agent,
            name: name.into(),
            description: String::new(),
            required: true,
            condition: None,
            max_retries: 0,
            expected_states: Vec::new(),
            terminal: false,
        }
    }

    pub fn optional(ordinal: u32, agent: AgentId, name: impl Into<String>, condition: Condition) -> Self {
        Self {
            required: false,
            condition: Some(condition),
            ..Self::required(ordinal, agent, name)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn expecting(mut self, states: &[&str]) -> Self {
        self.expected_states = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// 可恢复的工作流位置：重试时由调用方带回引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// 序号不大于 cursor 的阶段会被跳过
    pub cursor: u32,
    pub retry_cycle: u32,
}

/// 一次运行的输入
#[derive(Debug, Clone)]
pub enum RunInput {
    /// 新的用户消息
    Fresh(String),
    /// 从重试入口继续
    Resume(ResumePoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Verified,
    ChatReplied,
    RetryLimitExceeded,
}

/// 阶段失败（运行中止的原因）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub agent: AgentId,
    pub ordinal: u32,
    pub stage: String,
    pub cause: String,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stage {} '{}' ({}) failed: {}",
            self.ordinal, self.stage, self.agent, self.cause
        )
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        success: bool,
        reason: CompletionReason,
        mode: WorkflowMode,
    },
    Aborted(StageFailure),
    /// 验证失败且仍有重试额度，调用方应以 Resume 再次调用引擎
    RetryScheduled(ResumePoint),
}

/// 工作流错误类型
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
    #[error("No prompt builder registered for stage {0}")]
    MissingPrompt(u32),
    #[error("Unknown pipeline '{0}'")]
    UnknownPipeline(String),
}
