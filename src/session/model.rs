//! 会话数据模型

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::workflow::WorkflowMode;

/// 全进程单调递增的消息 ID
static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Agent 回复记录；追加进历史后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub agent: AgentId,
    /// 阶段名
    pub stage: String,
    pub ordinal: u32,
    pub content: String,
    pub message_id: u64,
    /// 毫秒时间戳
    pub timestamp: i64,
    /// 派发提供方
    pub provider: String,
}

impl Turn {
    pub fn new(
        agent: AgentId,
        stage: impl Into<String>,
        ordinal: u32,
        content: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            stage: stage.into(),
            ordinal,
            content: content.into(),
            message_id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now().timestamp_millis(),
            provider: provider.into(),
        }
    }
}

/// 历史条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryEntry {
    User { content: String, timestamp: i64 },
    Agent(Turn),
}

impl HistoryEntry {
    pub fn as_turn(&self) -> Option<&Turn> {
        match self {
            HistoryEntry::Agent(turn) => Some(turn),
            HistoryEntry::User { .. } => None,
        }
    }
}

/// 验证结论三态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    #[default]
    Unknown,
    Passed,
    Failed,
}

/// 单个会话
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// 只追加的历史
    pub history: Vec<HistoryEntry>,
    /// 当前请求的原始用户消息
    pub original_message: String,
    /// 当前请求在 history 中的起始下标
    pub request_start: usize,
    /// 最近完成的阶段序号
    pub cursor: Option<u32>,
    pub retry_cycle: u32,
    pub verified: Verification,
    pub last_mode: Option<WorkflowMode>,
    /// 只在运行间隙（签入时）刷新
    pub last_active: Instant,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            original_message: String::new(),
            request_start: 0,
            cursor: None,
            retry_cycle: 0,
            verified: Verification::Unknown,
            last_mode: None,
            last_active: Instant::now(),
            created_at: Utc::now(),
        }
    }

    /// 开始新请求：重置周期、游标与验证状态，保留历史
    pub fn begin_request(&mut self, message: &str) {
        self.request_start = self.history.len();
        self.original_message = message.to_string();
        self.cursor = None;
        self.retry_cycle = 0;
        self.verified = Verification::Unknown;
        self.history.push(HistoryEntry::User {
            content: message.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        });
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.history.push(HistoryEntry::Agent(turn));
    }

    /// 当前请求内的 Agent 回复
    pub fn current_turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.history[self.request_start.min(self.history.len())..]
            .iter()
            .filter_map(HistoryEntry::as_turn)
    }

    /// 当前请求的最后一条回复
    pub fn last_turn(&self) -> Option<&Turn> {
        self.current_turns().next_back()
    }

    pub fn last_turn_by(&self, agent: AgentId) -> Option<&Turn> {
        self.current_turns().rev().find(|t| t.agent == agent)
    }

    /// 当前请求之前的最后 n 条历史
    pub fn prior_entries(&self, n: usize) -> &[HistoryEntry] {
        let end = self.request_start.min(self.history.len());
        &self.history[end.saturating_sub(n)..end]
    }

    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_active.elapsed() > idle_timeout
    }

    pub fn snapshot(&self, running: bool) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            running,
            history: self.history.clone(),
            original_message: self.original_message.clone(),
            cursor: self.cursor,
            retry_cycle: self.retry_cycle,
            verified: self.verified,
            last_mode: self.last_mode,
            idle_secs: self.last_active.elapsed().as_secs(),
            created_at: self.created_at,
            last_confirmed_message: None,
        }
    }
}

/// 只读快照（对外暴露）
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    /// 是否有运行中的工作流
    pub running: bool,
    pub history: Vec<HistoryEntry>,
    pub original_message: String,
    pub cursor: Option<u32>,
    pub retry_cycle: u32,
    pub verified: Verification,
    pub last_mode: Option<WorkflowMode>,
    pub idle_secs: u64,
    pub created_at: DateTime<Utc>,
    pub last_confirmed_message: Option<u64>,
}
