//! Atlas - 多智能体编排器
//!
//! 入口：加载配置、装配评估器 / 派发器 / 播放桥 / 引擎，启动 HTTP 服务直到收到关闭信号。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atlas::api::{build_router, AppState};
use atlas::config::load_config;
use atlas::core::{
    OrchestratorError, PlaybackTicketCleanup, SessionStoreCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
use atlas::llm::{LlmClient, OpenAiClient};
use atlas::observability;
use atlas::runtime::{RuntimeSettings, WebSocketDispatcher};
use atlas::speech::HttpSynthesizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    observability::install_panic_hook();

    // 可选：第一个参数或 ATLAS_CONFIG 指定额外配置文件
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ATLAS_CONFIG").ok())
        .map(PathBuf::from);
    let cfg = load_config(config_path)
        .map_err(OrchestratorError::from)
        .context("Failed to load configuration")?;

    let classifier = Arc::new(OpenAiClient::from_config(&cfg.classifier));
    let dispatcher = Arc::new(WebSocketDispatcher::new(RuntimeSettings::from(&cfg.runtime)));
    let synthesizer = Arc::new(
        HttpSynthesizer::new(&cfg.speech.base_url, cfg.speech.synthesis_timeout())
            .context("Failed to build speech client")?,
    );

    let bind_addr = cfg.server.bind_addr.clone();
    let sweep_every = Duration::from_secs(cfg.session.sweep_interval_secs.max(1));
    tracing::info!(
        runtime = %cfg.runtime.base_url,
        classifier = %cfg.classifier.model,
        speech_enabled = cfg.speech.enabled,
        max_cycles = cfg.workflow.max_cycles,
        "Configuration loaded"
    );

    let state = Arc::new(
        AppState::new(cfg, dispatcher, classifier.clone(), synthesizer)
            .map_err(OrchestratorError::from)
            .context("Failed to assemble workflow engine")?,
    );

    let manager = Arc::new(ShutdownManager::new());
    manager.install_signal_handlers();
    let mut reasons = manager.subscribe();

    let sweeper = state.sessions.spawn_sweeper(sweep_every, manager.token());

    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager)).with_timeout(5);
    coordinator.register(PlaybackTicketCleanup::new(Arc::clone(&state.speech)));
    coordinator.register(SessionStoreCleanup::new(Arc::clone(&state.sessions)));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| OrchestratorError::Bind {
            addr: bind_addr.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!("Atlas listening on http://{}", bind_addr);

    // 信号一到就中断运行并释放票据，否则排空 /chat/stream 会被播放等待拖住
    let interrupter = {
        let state = Arc::clone(&state);
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager.wait_for_shutdown().await;
            state.begin_shutdown().await;
        })
    };

    let shutdown = Arc::clone(&manager);
    let served = axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .map_err(|e| OrchestratorError::Server(e.to_string()));

    if let Ok(reason) = reasons.try_recv() {
        tracing::info!(?reason, "Shutting down");
    }
    let exit_reason = match &served {
        Ok(()) => ShutdownReason::UserInitiated,
        Err(e) => ShutdownReason::FatalError(e.to_string()),
    };
    coordinator.finish(exit_reason).await;
    if let Err(e) = interrupter.await {
        tracing::warn!("Shutdown interrupter task ended abnormally: {}", e);
    }
    let (prompt_tokens, completion_tokens, total_tokens) = classifier.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "Classifier token usage");
    if let Err(e) = sweeper.await {
        tracing::warn!("Session sweeper task ended abnormally: {}", e);
    }

    served?;
    Ok(())
}
