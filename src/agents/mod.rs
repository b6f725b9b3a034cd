//! Agent 名册：协调者 / 执行者 / 验证者，外加不发声的 system 伪 Agent
//!
//! 名册是静态的；config 中的 `[agents.<id>]` 只能覆盖语音与工具开关。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::AgentOverride;

/// Agent 身份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// 理解并形式化用户请求，提供澄清与调整
    Coordinator,
    /// 通过远端运行时执行任务（可使用工具）
    Executor,
    /// 检查执行结果，给出诊断
    Verifier,
    /// 分类与系统记录用，不参与对话
    System,
}

impl AgentId {
    pub const ROSTER: [AgentId; 3] = [AgentId::Coordinator, AgentId::Executor, AgentId::Verifier];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Coordinator => "coordinator",
            AgentId::Executor => "executor",
            AgentId::Verifier => "verifier",
            AgentId::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Some(AgentId::Coordinator),
            "executor" => Some(AgentId::Executor),
            "verifier" => Some(AgentId::Verifier),
            "system" => Some(AgentId::System),
            _ => None,
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个 Agent 的静态描述
#[derive(Debug, Clone, Serialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub role: String,
    /// 消息前缀标签，例如 `[COORDINATOR]`
    pub signature: String,
    pub color: String,
    pub voice: Option<String>,
    pub enable_tools: bool,
    /// 派发时拼在系统提示最前面的角色约束
    #[serde(skip)]
    pub preamble: String,
}

impl AgentProfile {
    fn builtin(id: AgentId) -> Self {
        match id {
            AgentId::Coordinator => Self {
                id,
                role: "Coordinator: formalizes requests, clarifies and adjusts plans".into(),
                signature: "[COORDINATOR]".into(),
                color: "#00ff00".into(),
                voice: Some("dmytro".into()),
                enable_tools: false,
                preamble: "You are the coordinator. Answer in plain text only. Never call tools.".into(),
            },
            AgentId::Executor => Self {
                id,
                role: "Executor: carries out the task with the available tools".into(),
                signature: "[EXECUTOR]".into(),
                color: "#00ffff".into(),
                voice: Some("lada".into()),
                enable_tools: true,
                preamble: "You are the executor. Execute the task with your tools. Do not verify results visually; report what you did.".into(),
            },
            AgentId::Verifier => Self {
                id,
                role: "Verifier: checks results and diagnoses failures".into(),
                signature: "[VERIFIER]".into(),
                color: "#ffff00".into(),
                voice: Some("mykyta".into()),
                enable_tools: true,
                preamble: "You are the verifier. Check the result independently; you may take screenshots. State clearly whether the task succeeded.".into(),
            },
            AgentId::System => Self {
                id,
                role: "System: internal bookkeeping".into(),
                signature: "[SYSTEM]".into(),
                color: "#888888".into(),
                voice: None,
                enable_tools: false,
                preamble: String::new(),
            },
        }
    }
}

/// Agent 名册
#[derive(Debug, Clone)]
pub struct AgentRoster {
    profiles: HashMap<AgentId, AgentProfile>,
}

impl AgentRoster {
    pub fn builtin() -> Self {
        let profiles = [
            AgentId::Coordinator,
            AgentId::Executor,
            AgentId::Verifier,
            AgentId::System,
        ]
        .into_iter()
        .map(|id| (id, AgentProfile::builtin(id)))
        .collect();
        Self { profiles }
    }

    /// 应用配置覆盖；未知的 Agent 名只记录警告
    pub fn with_overrides(mut self, overrides: &HashMap<String, AgentOverride>) -> Self {
        for (name, ov) in overrides {
            let Some(id) = AgentId::parse(name) else {
                tracing::warn!("Ignoring override for unknown agent '{}'", name);
                continue;
            };
            if let Some(profile) = self.profiles.get_mut(&id) {
                if let Some(voice) = &ov.voice {
                    profile.voice = if voice.is_empty() { None } else { Some(voice.clone()) };
                }
                if let Some(tools) = ov.enable_tools {
                    profile.enable_tools = tools;
                }
            }
        }
        self
    }

    pub fn get(&self, id: AgentId) -> &AgentProfile {
        // 构造时四个身份都已填入
        &self.profiles[&id]
    }

    pub fn voice(&self, id: AgentId) -> Option<&str> {
        self.get(id).voice.as_deref()
    }

    /// 对外可见的三个 Agent（不含 system）
    pub fn roster(&self) -> Vec<&AgentProfile> {
        AgentId::ROSTER.iter().map(|id| self.get(*id)).collect()
    }
}

impl Default for AgentRoster {
    fn default() -> Self {
        Self::builtin()
    }
}
