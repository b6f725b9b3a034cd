//! HTTP 入口：任务提交（NDJSON 流）、播放回调与诊断接口

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentRoster;
use crate::analysis::{ConditionEvaluator, EvaluatorSettings};
use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::runtime::AgentDispatcher;
use crate::session::SessionStore;
use crate::speech::{AudioSyncBridge, PlaybackSettings, SpeechSynthesizer};
use crate::workflow::{EngineSettings, WorkflowEngine, WorkflowError};

pub use error::ApiError;

/// 各 handler 共享的状态
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<WorkflowEngine>,
    pub sessions: Arc<SessionStore>,
    pub speech: Arc<AudioSyncBridge>,
    pub evaluator: Arc<ConditionEvaluator>,
    shutdown: CancellationToken,
}

impl AppState {
    /// 用外部能力（派发、分类、合成）组装状态
    pub fn new(
        config: AppConfig,
        dispatcher: Arc<dyn AgentDispatcher>,
        classifier: Arc<dyn LlmClient>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Result<Self, WorkflowError> {
        let evaluator = Arc::new(ConditionEvaluator::new(
            classifier,
            EvaluatorSettings::from(&config.classifier),
        ));
        let speech = Arc::new(AudioSyncBridge::new(
            synthesizer,
            PlaybackSettings::from(&config.speech),
        ));
        let roster = AgentRoster::builtin().with_overrides(&config.agents);
        let shutdown = CancellationToken::new();
        let engine = Arc::new(
            WorkflowEngine::new(
                dispatcher,
                Arc::clone(&evaluator),
                Arc::clone(&speech),
                roster,
                EngineSettings::from_config(&config),
            )?
            .with_shutdown(shutdown.clone()),
        );
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_secs(
            config.session.idle_timeout_secs,
        )));

        Ok(Self {
            config,
            engine,
            sessions,
            speech,
            evaluator,
            shutdown,
        })
    }

    /// 关闭开始：进行中的运行在阶段之间停止，未解决的播放票据全部释放，
    /// 使 HTTP 服务排空连接时不被播放等待拖住
    pub async fn begin_shutdown(&self) {
        self.shutdown.cancel();
        let released = self.speech.release_all().await;
        tracing::info!(released, "Workflow runs interrupted for shutdown");
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/chat/confirm", post(handlers::chat_confirm))
        .route("/tts/completed", post(handlers::tts_completed))
        .route("/tts/pending", get(handlers::tts_pending))
        .route("/workflow", get(handlers::workflow))
        .route("/agents", get(handlers::agents))
        .route("/sessions/:id", get(handlers::session_snapshot))
        .route("/analysis/last", get(handlers::last_analysis))
        .route("/health", get(handlers::health))
        .with_state(state)
}
