//! 会话：单次对话的可变状态与按键存取的会话存储

pub mod model;
pub mod store;

pub use model::{HistoryEntry, Session, SessionSnapshot, Turn, Verification};
pub use store::{SessionError, SessionStore};
