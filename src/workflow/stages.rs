//! 内置的两套阶段表

use crate::agents::AgentId;

use super::builder::{Pipeline, PipelineBuilder};
use super::conditions::Condition;
use super::prompts;
use super::types::{StageDefinition, WorkflowError, WorkflowMode};

/// 任务流水线的重试入口
pub const TASK_RETRY_ENTRY: u32 = 1;

/// 协调 → 执行 → [澄清 → 再执行] → [诊断 → 调整] → 验证
pub fn task_pipeline() -> Result<Pipeline, WorkflowError> {
    PipelineBuilder::new(WorkflowMode::Task)
        .stage(
            StageDefinition::required(1, AgentId::Coordinator, "initial_processing")
                .describe("Coordinator formalizes the user request into a task"),
            prompts::initial_processing,
        )
        .stage(
            StageDefinition::optional(2, AgentId::Coordinator, "retry_planning", Condition::RetryCycleActive)
                .describe("Coordinator re-plans after failed verification"),
            prompts::retry_planning,
        )
        .stage(
            StageDefinition::required(3, AgentId::Executor, "execution")
                .describe("Executor carries out the task")
                .expecting(&["completed", "needs_clarification", "blocked", "incomplete"]),
            prompts::execution,
        )
        .stage(
            StageDefinition::optional(
                4,
                AgentId::Coordinator,
                "clarification",
                Condition::ExecutorNeedsClarification,
            )
            .describe("Coordinator answers the executor's question")
            .expecting(&["clarified", "not_clarified"]),
            prompts::clarification,
        )
        .stage(
            StageDefinition::optional(
                5,
                AgentId::Executor,
                "clarified_execution",
                Condition::CoordinatorProvidedClarification,
            )
            .describe("Executor continues with the clarification")
            .expecting(&["completed", "blocked", "incomplete"]),
            prompts::clarified_execution,
        )
        .stage(
            StageDefinition::optional(6, AgentId::Verifier, "diagnosis", Condition::ExecutorStillBlocked)
                .describe("Verifier diagnoses why the executor is blocked"),
            prompts::diagnosis,
        )
        .stage(
            StageDefinition::optional(
                7,
                AgentId::Coordinator,
                "task_adjustment",
                Condition::VerifierProvidedDiagnosis,
            )
            .describe("Coordinator adjusts the task using the diagnosis"),
            prompts::task_adjustment,
        )
        .stage(
            StageDefinition::required(8, AgentId::Verifier, "verification")
                .describe("Verifier checks the result")
                .expecting(&["verification_passed", "verification_failed"])
                .terminal(),
            prompts::verification,
        )
        .retry_entry(TASK_RETRY_ENTRY)
        .build()
}

/// 单阶段闲聊
pub fn chat_pipeline() -> Result<Pipeline, WorkflowError> {
    PipelineBuilder::new(WorkflowMode::Chat)
        .stage(
            StageDefinition::required(0, AgentId::Coordinator, "chat_reply")
                .describe("Coordinator replies conversationally")
                .terminal(),
            prompts::chat_reply,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pipelines_are_valid() {
        let task = task_pipeline().unwrap();
        assert_eq!(task.stages().len(), 8);
        assert_eq!(task.terminal().map(|s| s.name.as_str()), Some("verification"));
        assert_eq!(task.retry_entry, Some(1));
        assert_eq!(task.stage(2).and_then(|s| s.condition), Some(Condition::RetryCycleActive));

        let chat = chat_pipeline().unwrap();
        assert_eq!(chat.stages().len(), 1);
        assert_eq!(chat.retry_entry, None);
    }

    #[test]
    fn test_pipeline_serializes_without_prompts() {
        let v = serde_json::to_value(task_pipeline().unwrap()).unwrap();
        assert_eq!(v["mode"], "task");
        assert_eq!(v["stages"][3]["condition"], "executor_needs_clarification");
        assert!(v.get("prompts").is_none());
    }
}
