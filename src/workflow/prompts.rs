//! 阶段提示词：按阶段序号注册的构建器
//!
//! 构建器只看 `PromptContext`（原始消息、本次请求的回复、重试周期），不直接读会话。

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::agents::AgentId;
use crate::session::{HistoryEntry, Session, Turn};

use super::types::StageDefinition;

/// 聊天阶段可见的历史条数
const CHAT_CONTEXT_ENTRIES: usize = 3;

/// 渲染好的提示词对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    pub system: String,
    pub user: String,
}

/// 构建提示词所需的只读上下文
pub struct PromptContext<'a> {
    pub stage: &'a StageDefinition,
    pub original_message: &'a str,
    /// 本次请求内已产生的回复（按时间顺序）
    pub turns: Vec<&'a Turn>,
    pub retry_cycle: u32,
    /// 本次请求之前的最近几条历史
    pub prior: &'a [HistoryEntry],
}

impl<'a> PromptContext<'a> {
    pub fn new(session: &'a Session, stage: &'a StageDefinition) -> Self {
        Self {
            stage,
            original_message: &session.original_message,
            turns: session.current_turns().collect(),
            retry_cycle: session.retry_cycle,
            prior: session.prior_entries(CHAT_CONTEXT_ENTRIES),
        }
    }

    pub fn last_by(&self, agent: AgentId) -> Option<&'a Turn> {
        self.turns.iter().rev().find(|t| t.agent == agent).copied()
    }

    fn last_text(&self, agent: AgentId) -> &'a str {
        self.last_by(agent).map(|t| t.content.as_str()).unwrap_or("(none)")
    }

    /// 本次请求的对话记录
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            let _ = writeln!(out, "[{}] {}", turn.agent.as_str().to_uppercase(), turn.content);
        }
        out
    }
}

/// 提示词构建器
pub trait PromptBuilder: Send + Sync {
    fn build(&self, ctx: &PromptContext<'_>) -> StagePrompt;
}

impl<F> PromptBuilder for F
where
    F: Fn(&PromptContext<'_>) -> StagePrompt + Send + Sync,
{
    fn build(&self, ctx: &PromptContext<'_>) -> StagePrompt {
        self(ctx)
    }
}

/// 阶段序号 → 构建器
#[derive(Clone, Default)]
pub struct PromptRegistry {
    builders: HashMap<u32, Arc<dyn PromptBuilder>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ordinal: u32, builder: Arc<dyn PromptBuilder>) {
        self.builders.insert(ordinal, builder);
    }

    pub fn get(&self, ordinal: u32) -> Option<Arc<dyn PromptBuilder>> {
        self.builders.get(&ordinal).cloned()
    }

    pub fn contains(&self, ordinal: u32) -> bool {
        self.builders.contains_key(&ordinal)
    }
}

impl std::fmt::Debug for PromptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ordinals: Vec<_> = self.builders.keys().collect();
        ordinals.sort();
        f.debug_struct("PromptRegistry").field("ordinals", &ordinals).finish()
    }
}

// ---- 内置模板 ----

pub fn initial_processing(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "Turn the user's request into a precise task for the executor. \
                 List the concrete steps and the observable result that proves success."
            .into(),
        user: format!("User request:\n{}", ctx.original_message),
    }
}

pub fn retry_planning(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "The previous attempt failed verification. Write a corrected plan for the executor \
                 that addresses the verifier's findings."
            .into(),
        user: format!(
            "Original request:\n{}\n\nRetry cycle: {}\n\nVerifier findings:\n{}\n\nLast executor report:\n{}",
            ctx.original_message,
            ctx.retry_cycle,
            ctx.last_text(AgentId::Verifier),
            ctx.last_text(AgentId::Executor),
        ),
    }
}

pub fn execution(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "Execute the task below. If something essential is unclear, ask one specific question \
                 instead of guessing."
            .into(),
        user: format!(
            "Task from the coordinator:\n{}\n\nOriginal request:\n{}",
            ctx.last_text(AgentId::Coordinator),
            ctx.original_message
        ),
    }
}

pub fn clarification(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "The executor asked for clarification. Answer the question precisely so the executor can continue."
            .into(),
        user: format!(
            "Original request:\n{}\n\nExecutor question:\n{}",
            ctx.original_message,
            ctx.last_text(AgentId::Executor)
        ),
    }
}

pub fn clarified_execution(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "Continue the task using the clarification below.".into(),
        user: format!(
            "Clarification:\n{}\n\nOriginal request:\n{}",
            ctx.last_text(AgentId::Coordinator),
            ctx.original_message
        ),
    }
}

pub fn diagnosis(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "The executor is blocked. Inspect the system state and explain the cause and a way forward."
            .into(),
        user: format!(
            "Original request:\n{}\n\nExecutor report:\n{}",
            ctx.original_message,
            ctx.last_text(AgentId::Executor)
        ),
    }
}

pub fn task_adjustment(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "Adjust the task using the verifier's diagnosis so the executor can finish it.".into(),
        user: format!(
            "Original request:\n{}\n\nDiagnosis:\n{}",
            ctx.original_message,
            ctx.last_text(AgentId::Verifier)
        ),
    }
}

pub fn verification(ctx: &PromptContext<'_>) -> StagePrompt {
    StagePrompt {
        system: "Verify independently whether the request was fulfilled. \
                 Start your answer with CONFIRMED or NOT COMPLETED and give the evidence."
            .into(),
        user: format!(
            "Original request:\n{}\n\nTranscript:\n{}",
            ctx.original_message,
            ctx.transcript()
        ),
    }
}

pub fn chat_reply(ctx: &PromptContext<'_>) -> StagePrompt {
    let mut context = String::new();
    for entry in ctx.prior {
        match entry {
            HistoryEntry::User { content, .. } => {
                let _ = writeln!(context, "User: {}", content);
            }
            HistoryEntry::Agent(turn) => {
                let _ = writeln!(context, "{}: {}", turn.agent, turn.content);
            }
        }
    }
    StagePrompt {
        system: "Reply conversationally and briefly. Do not start any task.".into(),
        user: if context.is_empty() {
            ctx.original_message.to_string()
        } else {
            format!("Recent conversation:\n{}\nUser: {}", context, ctx.original_message)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_sees_only_current_request() {
        let mut s = Session::new("p");
        s.begin_request("hello");
        s.append_turn(Turn::new(AgentId::Coordinator, "chat_reply", 0, "Hi!", "mock"));
        s.begin_request("copy the file");
        s.append_turn(Turn::new(AgentId::Coordinator, "initial_processing", 1, "Copy a.txt to b/", "mock"));

        let stage = StageDefinition::required(3, AgentId::Executor, "execution");
        let ctx = PromptContext::new(&s, &stage);
        assert_eq!(ctx.turns.len(), 1);
        assert_eq!(ctx.prior.len(), 2);

        let p = execution(&ctx);
        assert!(p.user.contains("Copy a.txt to b/"));
        assert!(p.user.contains("copy the file"));
    }

    #[test]
    fn test_chat_reply_includes_prior_entries() {
        let mut s = Session::new("p");
        s.begin_request("hello");
        s.append_turn(Turn::new(AgentId::Coordinator, "chat_reply", 0, "Hi!", "mock"));
        s.begin_request("how are you?");
        let stage = StageDefinition::required(0, AgentId::Coordinator, "chat_reply");
        let p = chat_reply(&PromptContext::new(&s, &stage));
        assert!(p.user.contains("coordinator: Hi!"));
        assert!(p.user.ends_with("User: how are you?"));
    }

    fn shout(ctx: &PromptContext<'_>) -> StagePrompt {
        StagePrompt {
            system: String::new(),
            user: ctx.original_message.to_uppercase(),
        }
    }

    #[test]
    fn test_registry_accepts_plain_functions() {
        let mut reg = PromptRegistry::new();
        reg.register(9, Arc::new(shout));
        assert!(reg.contains(9));
        assert!(reg.get(1).is_none());

        let mut s = Session::new("p");
        s.begin_request("ping");
        let stage = StageDefinition::required(9, AgentId::Coordinator, "shout");
        let built = reg.get(9).unwrap().build(&PromptContext::new(&s, &stage));
        assert_eq!(built.user, "PING");
    }
}
