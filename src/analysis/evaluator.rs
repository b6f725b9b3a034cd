//! 条件评估器：分类服务 + 本地回退 + 最近一次分析记录

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agents::AgentId;
use crate::config::ClassifierSection;
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};

use super::{AnalysisKind, ConditionResult};

/// 无效输入时返回的置信度
const INVALID_INPUT_CONFIDENCE: f64 = 0.1;

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Classifier,
    Fallback,
    InvalidInput,
}

/// 最近一次分析（仅供观察，不参与控制流）
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub agent: AgentId,
    pub analysis: AnalysisKind,
    pub result: ConditionResult,
    pub source: AnalysisSource,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorSettings {
    pub timeout: Duration,
    pub options: CompletionOptions,
}

impl From<&ClassifierSection> for EvaluatorSettings {
    fn from(cfg: &ClassifierSection) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            options: CompletionOptions {
                temperature: cfg.temperature,
                max_tokens: cfg.max_tokens,
            },
        }
    }
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            options: CompletionOptions::default(),
        }
    }
}

#[derive(Deserialize)]
struct ClassifierReply {
    predicted_state: String,
    confidence: f64,
}

pub struct ConditionEvaluator {
    llm: Arc<dyn LlmClient>,
    settings: EvaluatorSettings,
    last: Arc<RwLock<Option<AnalysisRecord>>>,
}

impl ConditionEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>, settings: EvaluatorSettings) -> Self {
        Self {
            llm,
            settings,
            last: Arc::new(RwLock::new(None)),
        }
    }

    /// 评估文本；`None`、空白或字面量 "undefined" 直接返回默认状态
    pub async fn evaluate(
        &self,
        kind: AnalysisKind,
        agent: AgentId,
        text: Option<&str>,
    ) -> ConditionResult {
        let (result, source) = match text.map(str::trim) {
            None | Some("") | Some("undefined") => {
                tracing::debug!(analysis = kind.as_str(), %agent, "Invalid analysis input, using default");
                (
                    ConditionResult::new(kind.default_state(), INVALID_INPUT_CONFIDENCE),
                    AnalysisSource::InvalidInput,
                )
            }
            Some(text) => match self.classify(kind, agent, text).await {
                Some(result) => (result, AnalysisSource::Classifier),
                None => (kind.rules().classify(text), AnalysisSource::Fallback),
            },
        };

        tracing::info!(
            analysis = kind.as_str(),
            %agent,
            state = %result.predicted_state,
            confidence = result.confidence,
            source = ?source,
            "Condition evaluated"
        );

        *self.last.write().await = Some(AnalysisRecord {
            agent,
            analysis: kind,
            result: result.clone(),
            source,
            at: Utc::now(),
        });

        result
    }

    /// 调用分类服务；超时、网络错误或格式不合法都返回 None
    async fn classify(&self, kind: AnalysisKind, agent: AgentId, text: &str) -> Option<ConditionResult> {
        let messages = vec![
            ChatMessage::system(kind.system_prompt()),
            ChatMessage::user(format!(
                "Agent: {}\nAnalysis: {}\nText:\n{}",
                agent,
                kind.as_str(),
                text
            )),
        ];

        let raw = match tokio::time::timeout(
            self.settings.timeout,
            self.llm.complete(&messages, self.settings.options),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(analysis = kind.as_str(), "Classifier call failed: {}", e);
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    analysis = kind.as_str(),
                    "Classifier timed out after {:?}",
                    self.settings.timeout
                );
                return None;
            }
        };

        let parsed = parse_reply(&raw);
        if parsed.is_none() {
            tracing::warn!(analysis = kind.as_str(), "Malformed classifier reply: {}", raw);
        }
        parsed
    }

    pub async fn last_analysis(&self) -> Option<AnalysisRecord> {
        self.last.read().await.clone()
    }
}

/// 解析 `{predicted_state, confidence}`；允许外层 ``` 代码块
fn parse_reply(raw: &str) -> Option<ConditionResult> {
    let body = raw.trim();
    let body = body
        .strip_prefix("```json")
        .or_else(|| body.strip_prefix("```"))
        .and_then(|b| b.strip_suffix("```"))
        .unwrap_or(body)
        .trim();

    let reply: ClassifierReply = serde_json::from_str(body).ok()?;
    let state = reply.predicted_state.trim();
    if state.is_empty() || !(0.0..=1.0).contains(&reply.confidence) {
        return None;
    }
    Some(ConditionResult::new(state, reply.confidence))
}
