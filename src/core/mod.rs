//! 核心层：启动错误、优雅关闭

pub mod error;
pub mod shutdown;

pub use error::OrchestratorError;
pub use shutdown::{
    PlaybackTicketCleanup, SessionStoreCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
