//! 工作流：阶段表、条件门控、提示词注册表与执行引擎

pub mod builder;
pub mod conditions;
pub mod engine;
pub mod events;
pub mod prompts;
pub mod stages;
pub mod types;

pub use builder::{Pipeline, PipelineBuilder};
pub use conditions::Condition;
pub use engine::{EngineSettings, WorkflowEngine};
pub use events::{EventReceiver, EventSender, WorkflowEvent};
pub use prompts::{PromptBuilder, PromptContext, PromptRegistry, StagePrompt};
pub use stages::{chat_pipeline, task_pipeline, TASK_RETRY_ENTRY};
pub use types::{
    CompletionReason, ResumePoint, RunInput, RunOutcome, StageDefinition, StageFailure,
    WorkflowError, WorkflowMode,
};
