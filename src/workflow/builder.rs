//! 流水线构建器
//!
//! 提供流畅的 API 组装阶段表与提示词，build 时校验阶段表的结构约束

use std::sync::Arc;

use serde::Serialize;

use super::prompts::{PromptBuilder, PromptRegistry};
use super::types::{StageDefinition, WorkflowError, WorkflowMode};

/// 校验过的阶段表
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    pub mode: WorkflowMode,
    /// 重试周期从该序号之后继续
    pub retry_entry: Option<u32>,
    pub stages: Vec<StageDefinition>,
    #[serde(skip)]
    prompts: PromptRegistry,
}

impl Pipeline {
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn terminal(&self) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.terminal)
    }

    pub fn stage(&self, ordinal: u32) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.ordinal == ordinal)
    }

    pub fn prompt_for(&self, ordinal: u32) -> Option<Arc<dyn PromptBuilder>> {
        self.prompts.get(ordinal)
    }
}

pub struct PipelineBuilder {
    mode: WorkflowMode,
    stages: Vec<StageDefinition>,
    prompts: PromptRegistry,
    retry_entry: Option<u32>,
}

impl PipelineBuilder {
    pub fn new(mode: WorkflowMode) -> Self {
        Self {
            mode,
            stages: Vec::new(),
            prompts: PromptRegistry::new(),
            retry_entry: None,
        }
    }

    /// 添加阶段及其提示词构建器
    pub fn stage<P>(mut self, definition: StageDefinition, prompt: P) -> Self
    where
        P: PromptBuilder + 'static,
    {
        self.prompts.register(definition.ordinal, Arc::new(prompt));
        self.stages.push(definition);
        self
    }

    /// 添加阶段但不注册提示词（build 时会报错，除非之后另行注册）
    pub fn bare_stage(mut self, definition: StageDefinition) -> Self {
        self.stages.push(definition);
        self
    }

    pub fn retry_entry(mut self, ordinal: u32) -> Self {
        self.retry_entry = Some(ordinal);
        self
    }

    /// 构建流水线
    pub fn build(self) -> Result<Pipeline, WorkflowError> {
        let mode = self.mode.as_str();
        if self.stages.is_empty() {
            return Err(WorkflowError::InvalidConfiguration(format!(
                "{} pipeline has no stages",
                mode
            )));
        }

        for pair in self.stages.windows(2) {
            if pair[1].ordinal <= pair[0].ordinal {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "{} pipeline: stage ordinals must be unique and increasing ({} after {})",
                    mode, pair[1].ordinal, pair[0].ordinal
                )));
            }
        }

        let terminals: Vec<_> = self.stages.iter().filter(|s| s.terminal).collect();
        match terminals.as_slice() {
            [only] if only.required => {}
            [only] => {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "{} pipeline: terminal stage {} must be required",
                    mode, only.ordinal
                )))
            }
            _ => {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "{} pipeline needs exactly one terminal stage, found {}",
                    mode,
                    terminals.len()
                )))
            }
        }

        for stage in &self.stages {
            if !stage.required && stage.condition.is_none() {
                tracing::debug!(ordinal = stage.ordinal, "Optional stage without condition always runs");
            }
            if !self.prompts.contains(stage.ordinal) {
                return Err(WorkflowError::MissingPrompt(stage.ordinal));
            }
        }

        if let Some(entry) = self.retry_entry {
            if !self.stages.iter().any(|s| s.ordinal == entry) {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "{} pipeline: retry entry {} is not a stage",
                    mode, entry
                )));
            }
        }

        Ok(Pipeline {
            mode: self.mode,
            retry_entry: self.retry_entry,
            stages: self.stages,
            prompts: self.prompts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentId;
    use crate::workflow::prompts::{chat_reply, execution};

    #[test]
    fn test_build_simple_pipeline() {
        let p = PipelineBuilder::new(WorkflowMode::Task)
            .stage(StageDefinition::required(1, AgentId::Coordinator, "a"), chat_reply)
            .stage(StageDefinition::required(2, AgentId::Executor, "b").terminal(), execution)
            .retry_entry(1)
            .build()
            .expect("valid pipeline");
        assert_eq!(p.stages().len(), 2);
        assert_eq!(p.terminal().map(|s| s.ordinal), Some(2));
        assert!(p.prompt_for(2).is_some());
    }

    #[test]
    fn test_rejects_non_increasing_ordinals() {
        let r = PipelineBuilder::new(WorkflowMode::Task)
            .stage(StageDefinition::required(2, AgentId::Coordinator, "a"), chat_reply)
            .stage(StageDefinition::required(2, AgentId::Executor, "b").terminal(), execution)
            .build();
        assert!(matches!(r, Err(WorkflowError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_bad_terminal() {
        let none = PipelineBuilder::new(WorkflowMode::Chat)
            .stage(StageDefinition::required(0, AgentId::Coordinator, "a"), chat_reply)
            .build();
        assert!(none.is_err());

        let optional = PipelineBuilder::new(WorkflowMode::Chat)
            .stage(
                StageDefinition::optional(
                    0,
                    AgentId::Coordinator,
                    "a",
                    crate::workflow::Condition::RetryCycleActive,
                )
                .terminal(),
                chat_reply,
            )
            .build();
        assert!(optional.is_err());
    }

    #[test]
    fn test_rejects_missing_prompt_and_retry_entry() {
        let r = PipelineBuilder::new(WorkflowMode::Chat)
            .bare_stage(StageDefinition::required(0, AgentId::Coordinator, "a").terminal())
            .build();
        assert!(matches!(r, Err(WorkflowError::MissingPrompt(0))));

        let r = PipelineBuilder::new(WorkflowMode::Chat)
            .stage(StageDefinition::required(0, AgentId::Coordinator, "a").terminal(), chat_reply)
            .retry_entry(5)
            .build();
        assert!(matches!(r, Err(WorkflowError::InvalidConfiguration(_))));
    }
}
