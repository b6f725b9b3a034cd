//! 可选阶段的门控条件
//!
//! 每个条件自行决定从会话中取哪条回复作为输入，再交给条件评估器分类。

use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::analysis::{AnalysisKind, ConditionEvaluator};
use crate::session::Session;

/// 协调者澄清的关键词预检
const CLARIFICATION_KEYWORDS: [&str; 4] = ["clarif", "correction", "explanation", "change"];

/// 诊断内容的最小长度（字符）
const MIN_DIAGNOSIS_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// 执行者刚请求澄清
    ExecutorNeedsClarification,
    /// 协调者刚给出澄清
    CoordinatorProvidedClarification,
    /// 执行者仍然受阻
    ExecutorStillBlocked,
    /// 验证者刚给出足够具体的诊断
    VerifierProvidedDiagnosis,
    /// 最近一次验证结论为失败
    VerificationFailed,
    /// 处于重试周期中
    RetryCycleActive,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::ExecutorNeedsClarification => "executor_needs_clarification",
            Condition::CoordinatorProvidedClarification => "coordinator_provided_clarification",
            Condition::ExecutorStillBlocked => "executor_still_blocked",
            Condition::VerifierProvidedDiagnosis => "verifier_provided_diagnosis",
            Condition::VerificationFailed => "verification_failed",
            Condition::RetryCycleActive => "retry_cycle_active",
        }
    }

    /// 分类门控：(分析类型, 目标状态, 阈值)；确定性条件返回 None
    pub fn gate(&self) -> Option<(AnalysisKind, &'static str, f64)> {
        match self {
            Condition::ExecutorNeedsClarification => {
                Some((AnalysisKind::Execution, "needs_clarification", 0.6))
            }
            Condition::CoordinatorProvidedClarification => {
                Some((AnalysisKind::Clarification, "clarified", 0.7))
            }
            Condition::ExecutorStillBlocked => Some((AnalysisKind::BlockDetection, "blocked", 0.7)),
            Condition::VerificationFailed => {
                Some((AnalysisKind::VerificationCheck, "verification_failed", 0.6))
            }
            Condition::VerifierProvidedDiagnosis | Condition::RetryCycleActive => None,
        }
    }

    /// 条件是否成立；输入不满足时保守地返回 false
    pub async fn evaluate(&self, session: &Session, evaluator: &ConditionEvaluator) -> bool {
        let input = match self {
            Condition::RetryCycleActive => return session.retry_cycle > 0,
            Condition::VerifierProvidedDiagnosis => {
                return session.last_turn().is_some_and(|t| {
                    t.agent == AgentId::Verifier && t.content.chars().count() > MIN_DIAGNOSIS_CHARS
                });
            }
            Condition::ExecutorNeedsClarification | Condition::ExecutorStillBlocked => {
                session.last_turn().filter(|t| t.agent == AgentId::Executor)
            }
            Condition::CoordinatorProvidedClarification => {
                let turn = session.last_turn().filter(|t| t.agent == AgentId::Coordinator);
                let mentions = turn.is_some_and(|t| {
                    let lower = t.content.to_lowercase();
                    CLARIFICATION_KEYWORDS.iter().any(|k| lower.contains(k))
                });
                if !mentions {
                    tracing::debug!(condition = self.as_str(), "No clarification keywords");
                    return false;
                }
                turn
            }
            Condition::VerificationFailed => session.last_turn_by(AgentId::Verifier),
        };

        let Some(turn) = input else {
            tracing::debug!(condition = self.as_str(), "Condition input missing");
            return false;
        };
        let Some((kind, state, threshold)) = self.gate() else {
            return false;
        };

        let result = evaluator.evaluate(kind, turn.agent, Some(&turn.content)).await;
        let holds = result.is(state, threshold);
        tracing::info!(
            condition = self.as_str(),
            state = %result.predicted_state,
            confidence = result.confidence,
            threshold,
            holds,
            "Condition checked"
        );
        holds
    }
}
