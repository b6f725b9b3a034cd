//! 本地回退规则表：分类服务不可用或返回无效结果时使用
//!
//! 每种分析一张有序表；按表内顺序逐条匹配，命中即返回，都不命中则返回 default。

use serde::{Deserialize, Serialize};

use super::ConditionResult;

/// 分析类型（决定提示词、回退规则表与默认状态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// 执行者输出：完成 / 需要澄清 / 受阻 / 未完成
    Execution,
    /// 协调者是否给出了澄清
    Clarification,
    /// 执行者是否仍然受阻
    BlockDetection,
    /// 验证者结论
    VerificationCheck,
    /// 用户消息是闲聊还是任务
    ModeSelection,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Execution => "execution",
            AnalysisKind::Clarification => "clarification",
            AnalysisKind::BlockDetection => "block_detection",
            AnalysisKind::VerificationCheck => "verification_check",
            AnalysisKind::ModeSelection => "mode_selection",
        }
    }

    /// 该分析允许的状态集合（也写进分类提示词）
    pub fn states(&self) -> &'static [&'static str] {
        match self {
            AnalysisKind::Execution => &["completed", "needs_clarification", "blocked", "incomplete"],
            AnalysisKind::Clarification => &["clarified", "not_clarified"],
            AnalysisKind::BlockDetection => &["blocked", "in_progress"],
            AnalysisKind::VerificationCheck => &["verification_passed", "verification_failed"],
            AnalysisKind::ModeSelection => &["chat", "task"],
        }
    }

    pub fn default_state(&self) -> &'static str {
        self.rules().default.state
    }

    /// 分类服务的系统提示词
    pub fn system_prompt(&self) -> String {
        let focus = match self {
            AnalysisKind::Execution => {
                "Decide whether the executor finished the task, needs clarification from the user or coordinator, is blocked by an error, or only partially finished."
            }
            AnalysisKind::Clarification => {
                "Decide whether the coordinator's message actually provides the clarification or correction the executor asked for."
            }
            AnalysisKind::BlockDetection => {
                "Decide whether the executor is still blocked and cannot proceed without outside help."
            }
            AnalysisKind::VerificationCheck => {
                "Decide whether the verifier confirmed the task as done or reported that it failed or is incomplete."
            }
            AnalysisKind::ModeSelection => {
                "Decide whether the user message is casual conversation (greeting, small talk, a question about you) or a task that requires actions on the computer."
            }
        };
        format!(
            "You classify the output of an agent in a multi-agent workflow.\n{}\n\
             Allowed states: {}.\n\
             Respond with ONLY a JSON object and nothing else:\n\
             {{\"predicted_state\": \"<state>\", \"confidence\": <number between 0.0 and 1.0>}}",
            focus,
            self.states().join(", ")
        )
    }

    pub fn rules(&self) -> &'static RuleTable {
        match self {
            AnalysisKind::Execution => &EXECUTION_RULES,
            AnalysisKind::Clarification => &CLARIFICATION_RULES,
            AnalysisKind::BlockDetection => &BLOCK_DETECTION_RULES,
            AnalysisKind::VerificationCheck => &VERIFICATION_RULES,
            AnalysisKind::ModeSelection => &MODE_SELECTION_RULES,
        }
    }
}

/// 一条回退规则
#[derive(Debug)]
pub struct StateRule {
    pub state: &'static str,
    pub patterns: &'static [&'static str],
    pub confidence: f64,
    /// true 时全部模式都出现才算命中
    pub requires_all: bool,
}

impl StateRule {
    fn matches(&self, haystack: &str) -> bool {
        if self.requires_all {
            self.patterns.iter().all(|p| haystack.contains(p))
        } else {
            self.patterns.iter().any(|p| haystack.contains(p))
        }
    }
}

#[derive(Debug)]
pub struct DefaultRule {
    pub state: &'static str,
    pub confidence: f64,
}

/// 有序规则表
#[derive(Debug)]
pub struct RuleTable {
    pub rules: &'static [StateRule],
    pub default: DefaultRule,
}

impl RuleTable {
    /// 对文本做规则匹配（大小写不敏感）
    pub fn classify(&self, text: &str) -> ConditionResult {
        let lower = text.to_lowercase();
        for rule in self.rules {
            if rule.matches(&lower) {
                return ConditionResult::new(rule.state, rule.confidence);
            }
        }
        ConditionResult::new(self.default.state, self.default.confidence)
    }
}

static EXECUTION_RULES: RuleTable = RuleTable {
    rules: &[
        StateRule {
            state: "needs_clarification",
            patterns: &[
                "need clarification",
                "please clarify",
                "can you clarify",
                "could you clarify",
                "which one",
                "not sure what you mean",
                "more details",
                "please specify",
            ],
            confidence: 0.8,
            requires_all: false,
        },
        StateRule {
            state: "blocked",
            patterns: &[
                "cannot proceed",
                "can't proceed",
                "unable to",
                "permission denied",
                "access denied",
                "blocked",
                "failed to",
            ],
            confidence: 0.75,
            requires_all: false,
        },
        StateRule {
            state: "incomplete",
            patterns: &["partially", "remaining"],
            confidence: 0.7,
            requires_all: true,
        },
        StateRule {
            state: "completed",
            patterns: &["completed", "done", "finished", "successfully", "task complete"],
            confidence: 0.7,
            requires_all: false,
        },
    ],
    default: DefaultRule {
        state: "incomplete",
        confidence: 0.3,
    },
};

static CLARIFICATION_RULES: RuleTable = RuleTable {
    rules: &[StateRule {
        state: "clarified",
        patterns: &[
            "clarif",
            "to be precise",
            "i mean",
            "correction",
            "instead",
            "explanation",
            "change",
            "should be",
        ],
        confidence: 0.75,
        requires_all: false,
    }],
    default: DefaultRule {
        state: "not_clarified",
        confidence: 0.3,
    },
};

static BLOCK_DETECTION_RULES: RuleTable = RuleTable {
    rules: &[StateRule {
        state: "blocked",
        patterns: &[
            "still cannot",
            "still can't",
            "still unable",
            "still blocked",
            "cannot proceed",
            "unable to",
            "no access",
            "error",
        ],
        confidence: 0.8,
        requires_all: false,
    }],
    default: DefaultRule {
        state: "in_progress",
        confidence: 0.3,
    },
};

static VERIFICATION_RULES: RuleTable = RuleTable {
    rules: &[
        StateRule {
            state: "verification_failed",
            patterns: &[
                "not completed",
                "not done",
                "failed",
                "incorrect",
                "does not match",
                "missing",
                "not found",
                "not confirmed",
            ],
            confidence: 0.8,
            requires_all: false,
        },
        StateRule {
            state: "verification_passed",
            patterns: &["confirmed", "verified", "success", "correct", "done"],
            confidence: 0.75,
            requires_all: false,
        },
    ],
    default: DefaultRule {
        state: "verification_passed",
        confidence: 0.3,
    },
};

static MODE_SELECTION_RULES: RuleTable = RuleTable {
    rules: &[StateRule {
        state: "chat",
        patterns: &[
            "hello",
            "hi ",
            "hey",
            "how are you",
            "good morning",
            "good evening",
            "thank",
            "who are you",
            "what can you do",
        ],
        confidence: 0.6,
        requires_all: false,
    }],
    default: DefaultRule {
        state: "task",
        confidence: 0.5,
    },
};
