//! 条件评估：把 Agent 的文本输出分类为离散状态 + 置信度
//!
//! 主路径调用外部分类服务（OpenAI 兼容补全），任何失败都回退到本地规则表，从不向调用方抛错。

pub mod evaluator;
pub mod rules;

use serde::{Deserialize, Serialize};

pub use evaluator::{AnalysisRecord, AnalysisSource, ConditionEvaluator, EvaluatorSettings};
pub use rules::{AnalysisKind, RuleTable, StateRule};

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub predicted_state: String,
    /// [0, 1]
    pub confidence: f64,
}

impl ConditionResult {
    pub fn new(state: impl Into<String>, confidence: f64) -> Self {
        Self {
            predicted_state: state.into(),
            confidence,
        }
    }

    /// 预测为 `state` 且置信度不低于阈值
    pub fn is(&self, state: &str, threshold: f64) -> bool {
        self.predicted_state == state && self.confidence >= threshold
    }
}
