//! Atlas - 多智能体编排器
//!
//! 模块划分：
//! - **agents**: Agent 身份与名册（签名、语音、工具开关）
//! - **analysis**: AI 条件评估器（状态分类 + 置信度）
//! - **api**: HTTP 入口（NDJSON 事件流、播放回调、诊断接口）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 启动错误、优雅关闭
//! - **llm**: 分类所用的 LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: 日志订阅器与 panic 钩子
//! - **runtime**: 远端 Agent 运行时的 WebSocket 客户端
//! - **session**: 会话历史与内存会话存储
//! - **speech**: 语音合成与播放同步桥
//! - **workflow**: 阶段表、条件分支、重试周期与执行引擎

pub mod agents;
pub mod analysis;
pub mod api;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod runtime;
pub mod session;
pub mod speech;
pub mod workflow;
