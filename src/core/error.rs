//! 编排器顶层错误
//!
//! 各层有自己的错误类型（DispatchError / WorkflowError / SessionError / ApiError），
//! 这里只汇总启动阶段会遇到的失败：配置、阶段表校验、端口绑定。

use thiserror::Error;

use crate::workflow::WorkflowError;

/// 启动与装配过程中的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),
}
