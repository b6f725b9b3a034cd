//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ATLAS__*` 覆盖（双下划线表示嵌套，如 `ATLAS__WORKFLOW__MAX_CYCLES=5`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub workflow: WorkflowSection,
    pub classifier: ClassifierSection,
    pub runtime: RuntimeSection,
    pub speech: SpeechSection,
    pub session: SessionSection,
    /// 按 Agent 覆盖名册默认值（键为 coordinator / executor / verifier）
    pub agents: HashMap<String, AgentOverride>,
}

/// [server] 段：监听地址与入站消息预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    /// 单条用户消息最大字符数
    pub max_message_chars: usize,
    pub over_budget: OverBudgetStrategy,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5101".to_string(),
            max_message_chars: 8000,
            over_budget: OverBudgetStrategy::Reject,
        }
    }
}

/// 超出消息预算时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverBudgetStrategy {
    /// 拒绝请求（HTTP 413）
    Reject,
    /// 截断到预算长度后继续
    Truncate,
}

/// [workflow] 段：重试周期、阶段超时、播放顺序
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 最大执行周期数（含首轮）
    pub max_cycles: u32,
    pub stage_timeout_secs: u64,
    /// 是否在语音播放完成前阻塞下一阶段
    pub strict_agent_order: bool,
    /// 是否先做 chat / task 模式分类
    pub mode_selection: bool,
    /// 上一轮为 chat 时，切换到 task 所需的最低置信度
    pub chat_stickiness: f64,
    /// 无语音时的展示停顿（毫秒）
    pub display_pause_ms: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_cycles: 3,
            stage_timeout_secs: 150,
            strict_agent_order: true,
            mode_selection: true,
            chat_stickiness: 0.65,
            display_pause_ms: 1500,
        }
    }
}

/// [classifier] 段：状态分类所用的 OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 100,
            timeout_secs: 10,
        }
    }
}

/// [runtime] 段：远端 Agent 运行时（WebSocket）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub base_url: String,
    pub ws_path: String,
    pub api_key: Option<String>,
    /// 发送前的提示词字符预算
    pub prompt_budget_chars: usize,
    pub timeout_secs: u64,
    /// 可协商的工具名前缀白名单
    pub tool_prefixes: Vec<String>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            ws_path: "/ws".to_string(),
            api_key: None,
            prompt_budget_chars: 4000,
            timeout_secs: 120,
            tool_prefixes: default_tool_prefixes(),
        }
    }
}

fn default_tool_prefixes() -> Vec<String> {
    vec![
        "computercontroller".into(),
        "developer".into(),
        "memory".into(),
        "playwright".into(),
        "vscode".into(),
        "browser_".into(),
    ]
}

/// [speech] 段：语音合成与播放同步
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechSection {
    pub enabled: bool,
    pub base_url: String,
    pub synthesis_timeout_secs: u64,
    pub playback_timeout_secs: u64,
    /// 合成失败时按字符估算的停顿（毫秒/字符）
    pub fallback_ms_per_char: u64,
    pub fallback_cap_ms: u64,
}

impl Default for SpeechSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:3001".to_string(),
            synthesis_timeout_secs: 30,
            playback_timeout_secs: 30,
            fallback_ms_per_char: 50,
            fallback_cap_ms: 5000,
        }
    }
}

impl SpeechSection {
    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

/// [session] 段：空闲淘汰
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

/// [agents.<id>] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentOverride {
    pub voice: Option<String>,
    pub enable_tools: Option<bool>,
}

/// 从 config 目录加载配置，环境变量 ATLAS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ATLAS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ATLAS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workflow.max_cycles, 3);
        assert_eq!(cfg.runtime.prompt_budget_chars, 4000);
        assert_eq!(cfg.classifier.timeout_secs, 10);
        assert_eq!(cfg.server.over_budget, OverBudgetStrategy::Reject);
        assert!(cfg.workflow.strict_agent_order);
        assert!(!cfg.speech.enabled);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[workflow]
max_cycles = 5
strict_agent_order = false

[server]
over_budget = "truncate"

[agents.executor]
voice = "anna"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.workflow.max_cycles, 5);
        assert!(!cfg.workflow.strict_agent_order);
        assert_eq!(cfg.workflow.stage_timeout_secs, 150);
        assert_eq!(cfg.server.over_budget, OverBudgetStrategy::Truncate);
        assert_eq!(
            cfg.agents.get("executor").and_then(|a| a.voice.as_deref()),
            Some("anna")
        );
    }
}
