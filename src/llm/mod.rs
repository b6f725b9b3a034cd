//! LLM 层：状态分类所用的聊天补全客户端（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{ChatMessage, CompletionOptions, LlmClient, LlmError, Role};
