//! 工作流引擎
//!
//! 按序号遍历阶段表：必选阶段总是执行，可选阶段先过条件门控；每个阶段派发给远端运行时，
//! 回复追加进历史并推送事件，再等待语音播放完成后才进入下一阶段。
//! 表走完后根据验证结论决定完成、安排重试或以重试耗尽结束。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agents::{AgentId, AgentRoster};
use crate::analysis::{AnalysisKind, ConditionEvaluator};
use crate::config::AppConfig;
use crate::runtime::{AgentDispatcher, DispatchRequest};
use crate::session::{Session, Turn, Verification};
use crate::speech::AudioSyncBridge;

use super::builder::Pipeline;
use super::conditions::Condition;
use super::events::{EventSender, WorkflowEvent};
use super::prompts::PromptContext;
use super::stages::{chat_pipeline, task_pipeline};
use super::types::{
    CompletionReason, ResumePoint, RunInput, RunOutcome, StageDefinition, StageFailure,
    WorkflowError, WorkflowMode,
};

/// 收到关闭信号后中止运行的原因
const SHUTDOWN_CAUSE: &str = "shutdown in progress";

/// mode_selection 判为 chat 的最低置信度
const CHAT_MODE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 最大执行周期数（含首轮）
    pub max_cycles: u32,
    pub stage_timeout: Duration,
    pub strict_agent_order: bool,
    pub speech_enabled: bool,
    pub mode_selection: bool,
    pub chat_stickiness: f64,
    /// 无语音时每条回复后的停顿
    pub display_pause: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_cycles: cfg.workflow.max_cycles.max(1),
            stage_timeout: Duration::from_secs(cfg.workflow.stage_timeout_secs),
            strict_agent_order: cfg.workflow.strict_agent_order,
            speech_enabled: cfg.speech.enabled,
            mode_selection: cfg.workflow.mode_selection,
            chat_stickiness: cfg.workflow.chat_stickiness,
            display_pause: Duration::from_millis(cfg.workflow.display_pause_ms),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct WorkflowEngine {
    task: Pipeline,
    chat: Pipeline,
    roster: AgentRoster,
    dispatcher: Arc<dyn AgentDispatcher>,
    evaluator: Arc<ConditionEvaluator>,
    speech: Arc<AudioSyncBridge>,
    settings: EngineSettings,
    shutdown: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(
        dispatcher: Arc<dyn AgentDispatcher>,
        evaluator: Arc<ConditionEvaluator>,
        speech: Arc<AudioSyncBridge>,
        roster: AgentRoster,
        settings: EngineSettings,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            task: task_pipeline()?,
            chat: chat_pipeline()?,
            roster,
            dispatcher,
            evaluator,
            speech,
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    /// 绑定关闭 token：取消后不再进入新阶段，进行中的派发与播放等待立即返回
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn pipeline(&self, mode: WorkflowMode) -> &Pipeline {
        match mode {
            WorkflowMode::Chat => &self.chat,
            WorkflowMode::Task => &self.task,
        }
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 处理一条用户消息直到终止：驱动重试周期，并发送终止事件
    pub async fn execute_request(
        &self,
        session: &mut Session,
        message: &str,
        events: &EventSender,
    ) -> RunOutcome {
        let mut input = RunInput::Fresh(message.to_string());
        loop {
            let outcome = self.run(session, input, events).await;
            match &outcome {
                RunOutcome::RetryScheduled(point) => {
                    tracing::info!(
                        session = %session.id,
                        cycle = point.retry_cycle,
                        max_cycles = self.settings.max_cycles,
                        "Starting retry cycle"
                    );
                    let _ = events.send(WorkflowEvent::RetryCycleStarted {
                        cycle: point.retry_cycle,
                        max_cycles: self.settings.max_cycles,
                        resume_after: point.cursor,
                    });
                    input = RunInput::Resume(*point);
                }
                RunOutcome::Completed {
                    success,
                    reason,
                    mode,
                } => {
                    tracing::info!(session = %session.id, success, ?reason, ?mode, "Workflow completed");
                    let _ = events.send(WorkflowEvent::WorkflowCompleted {
                        session_id: session.id.clone(),
                        success: *success,
                        reason: *reason,
                        mode: *mode,
                        retry_cycle: session.retry_cycle,
                    });
                    return outcome;
                }
                RunOutcome::Aborted(failure) => {
                    tracing::error!(session = %session.id, "Workflow aborted: {}", failure);
                    let _ = events.send(WorkflowEvent::stage_failed(&session.id, failure));
                    return outcome;
                }
            }
        }
    }

    /// 单次遍历阶段表
    pub async fn run(&self, session: &mut Session, input: RunInput, events: &EventSender) -> RunOutcome {
        let (mode, resume_after) = match input {
            RunInput::Fresh(message) => {
                let mode = if self.settings.mode_selection {
                    self.select_mode(session, &message).await
                } else {
                    WorkflowMode::Task
                };
                session.begin_request(&message);
                session.last_mode = Some(mode);
                (mode, None)
            }
            RunInput::Resume(point) => {
                session.retry_cycle = point.retry_cycle;
                session.cursor = Some(point.cursor);
                (WorkflowMode::Task, Some(point.cursor))
            }
        };

        let pipeline = self.pipeline(mode);
        tracing::info!(
            session = %session.id,
            mode = mode.as_str(),
            cycle = session.retry_cycle,
            resume_after = ?resume_after,
            "Running pipeline"
        );

        for stage in pipeline.stages() {
            if resume_after.is_some_and(|cursor| stage.ordinal <= cursor) {
                continue;
            }

            if self.shutdown.is_cancelled() {
                tracing::warn!(session = %session.id, ordinal = stage.ordinal, "Shutdown requested, stopping run");
                return RunOutcome::Aborted(StageFailure {
                    agent: stage.agent,
                    ordinal: stage.ordinal,
                    stage: stage.name.clone(),
                    cause: SHUTDOWN_CAUSE.to_string(),
                });
            }

            if !stage.required {
                if let Some(condition) = stage.condition {
                    if !condition.evaluate(session, &self.evaluator).await {
                        tracing::info!(ordinal = stage.ordinal, stage = %stage.name, "Skipping stage");
                        continue;
                    }
                }
            }

            if let Err(failure) = self.execute_stage(session, pipeline, stage, events).await {
                return RunOutcome::Aborted(failure);
            }
            session.cursor = Some(stage.ordinal);
        }

        match mode {
            WorkflowMode::Chat => RunOutcome::Completed {
                success: true,
                reason: CompletionReason::ChatReplied,
                mode,
            },
            WorkflowMode::Task => self.conclude(session, pipeline).await,
        }
    }

    /// 根据最后一次验证结论决定完成或重试
    async fn conclude(&self, session: &mut Session, pipeline: &Pipeline) -> RunOutcome {
        if !Condition::VerificationFailed.evaluate(session, &self.evaluator).await {
            session.verified = Verification::Passed;
            return RunOutcome::Completed {
                success: true,
                reason: CompletionReason::Verified,
                mode: WorkflowMode::Task,
            };
        }

        session.verified = Verification::Failed;
        match pipeline.retry_entry {
            Some(entry) if self.should_retry(session) => {
                session.retry_cycle += 1;
                session.cursor = Some(entry);
                RunOutcome::RetryScheduled(ResumePoint {
                    cursor: entry,
                    retry_cycle: session.retry_cycle,
                })
            }
            _ => {
                tracing::warn!(
                    session = %session.id,
                    cycle = session.retry_cycle,
                    "Verification failed and retry limit reached"
                );
                RunOutcome::Completed {
                    success: false,
                    reason: CompletionReason::RetryLimitExceeded,
                    mode: WorkflowMode::Task,
                }
            }
        }
    }

    /// 仅当 retry_cycle < max_cycles - 1 时允许重试
    pub fn should_retry(&self, session: &Session) -> bool {
        session.retry_cycle + 1 < self.settings.max_cycles
    }

    /// 闲聊 / 任务分类；上一轮为闲聊时低置信度的任务判定不切换
    pub async fn select_mode(&self, session: &Session, message: &str) -> WorkflowMode {
        let result = self
            .evaluator
            .evaluate(AnalysisKind::ModeSelection, AgentId::System, Some(message))
            .await;

        let mode = if result.is("chat", CHAT_MODE_THRESHOLD) {
            WorkflowMode::Chat
        } else if session.last_mode == Some(WorkflowMode::Chat)
            && result.confidence < self.settings.chat_stickiness
        {
            tracing::debug!(confidence = result.confidence, "Keeping chat mode");
            WorkflowMode::Chat
        } else {
            WorkflowMode::Task
        };
        tracing::info!(session = %session.id, mode = mode.as_str(), "Mode selected");
        mode
    }

    /// 执行单个阶段（含阶段内重试）；成功时回复已追加并完成播放门控
    async fn execute_stage(
        &self,
        session: &mut Session,
        pipeline: &Pipeline,
        stage: &StageDefinition,
        events: &EventSender,
    ) -> Result<(), StageFailure> {
        let failure = |cause: String| StageFailure {
            agent: stage.agent,
            ordinal: stage.ordinal,
            stage: stage.name.clone(),
            cause,
        };

        let builder = pipeline
            .prompt_for(stage.ordinal)
            .ok_or_else(|| failure(WorkflowError::MissingPrompt(stage.ordinal).to_string()))?;
        let prompt = builder.build(&PromptContext::new(session, stage));
        let profile = self.roster.get(stage.agent);
        let system_prompt = if profile.preamble.is_empty() {
            prompt.system
        } else {
            format!("{}\n\n{}", profile.preamble, prompt.system)
        };

        let attempts = stage.max_retries + 1;
        let mut cause = String::new();
        for attempt in 1..=attempts {
            tracing::info!(
                ordinal = stage.ordinal,
                stage = %stage.name,
                agent = %stage.agent,
                attempt,
                attempts,
                "Executing stage"
            );
            let request = DispatchRequest {
                agent: stage.agent,
                system_prompt: system_prompt.clone(),
                user_prompt: prompt.user.clone(),
                session_key: session.id.clone(),
                enable_tools: profile.enable_tools,
            };

            let attempt_result = tokio::select! {
                result = tokio::time::timeout(self.settings.stage_timeout, self.dispatcher.dispatch(request)) => result,
                _ = self.shutdown.cancelled() => return Err(failure(SHUTDOWN_CAUSE.to_string())),
            };
            match attempt_result {
                Ok(Ok(text)) => {
                    let turn = Turn::new(
                        stage.agent,
                        stage.name.clone(),
                        stage.ordinal,
                        text,
                        self.dispatcher.provider(),
                    );
                    let _ = events.send(WorkflowEvent::agent_message(
                        &turn,
                        &profile.signature,
                        profile.voice.as_deref(),
                        session.retry_cycle,
                    ));
                    let spoken = turn.content.clone();
                    session.append_turn(turn);
                    self.gate_on_playback(stage.agent, spoken).await;
                    return Ok(());
                }
                Ok(Err(e)) => cause = e.to_string(),
                Err(_) => cause = format!("stage timed out after {:?}", self.settings.stage_timeout),
            }
            tracing::warn!(ordinal = stage.ordinal, attempt, "Stage attempt failed: {}", cause);
        }

        Err(failure(cause))
    }

    /// 播放门控：严格顺序下等待播放完成，否则后台播放
    async fn gate_on_playback(&self, agent: AgentId, text: String) {
        let voice = match self.roster.voice(agent) {
            Some(voice) if self.settings.speech_enabled => voice.to_string(),
            _ => {
                if self.settings.strict_agent_order && !self.settings.display_pause.is_zero() {
                    tokio::time::sleep(self.settings.display_pause).await;
                }
                return;
            }
        };

        if self.settings.strict_agent_order {
            let played = tokio::select! {
                played = self.speech.speak_and_wait(&text, &voice) => played,
                _ = self.shutdown.cancelled() => false,
            };
            tracing::debug!(%agent, played, "Playback gate released");
        } else {
            let speech = Arc::clone(&self.speech);
            tokio::spawn(async move {
                speech.speak_and_wait(&text, &voice).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::EvaluatorSettings;
    use crate::llm::MockLlmClient;
    use crate::runtime::MockDispatcher;
    use crate::speech::{MockSynthesizer, PlaybackSettings};
    use tokio::sync::mpsc;

    fn engine(dispatcher: MockDispatcher, max_cycles: u32) -> WorkflowEngine {
        let speech = Arc::new(AudioSyncBridge::new(
            Arc::new(MockSynthesizer::succeeding()),
            PlaybackSettings {
                playback_timeout: Duration::from_millis(50),
                fallback_ms_per_char: 0,
                fallback_cap: Duration::ZERO,
            },
        ));
        let evaluator = Arc::new(ConditionEvaluator::new(
            Arc::new(MockLlmClient::failing()),
            EvaluatorSettings::default(),
        ));
        WorkflowEngine::new(
            Arc::new(dispatcher),
            evaluator,
            speech,
            AgentRoster::builtin(),
            EngineSettings {
                max_cycles,
                stage_timeout: Duration::from_secs(2),
                strict_agent_order: true,
                speech_enabled: false,
                mode_selection: false,
                chat_stickiness: 0.65,
                display_pause: Duration::ZERO,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_should_retry_bound() {
        let e = engine(MockDispatcher::new(), 3);
        let mut s = Session::new("x");
        assert!(e.should_retry(&s));
        s.retry_cycle = 1;
        assert!(e.should_retry(&s));
        s.retry_cycle = 2;
        assert!(!e.should_retry(&s));

        let single = engine(MockDispatcher::new(), 1);
        assert!(!single.should_retry(&Session::new("y")));
    }

    #[tokio::test]
    async fn test_happy_path_skips_optional_stages() {
        let dispatcher = MockDispatcher::new()
            .reply(AgentId::Coordinator, "Task: create notes.txt on the desktop.")
            .reply(AgentId::Executor, "Created notes.txt successfully.")
            .reply(AgentId::Verifier, "Confirmed: notes.txt exists.");
        let e = engine(dispatcher, 3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Session::new("happy");

        let outcome = e.execute_request(&mut s, "create notes.txt", &tx).await;
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                success: true,
                reason: CompletionReason::Verified,
                mode: WorkflowMode::Task
            }
        );
        assert_eq!(s.verified, Verification::Passed);
        let ordinals: Vec<u32> = s.current_turns().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, vec![1, 3, 8]);
        assert_eq!(s.cursor, Some(8));

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec!["agent_message", "agent_message", "agent_message", "workflow_completed"]
        );
    }

    #[tokio::test]
    async fn test_stage_attempts_honour_max_retries() {
        let dispatcher = MockDispatcher::new().reply(AgentId::Coordinator, "plan");
        let e = engine(dispatcher, 3);
        let mut task = e.task.clone();
        task.stages[0].max_retries = 2;
        let stage = task.stages[0].clone();

        let failing = Arc::new(MockDispatcher::new());
        let e = WorkflowEngine {
            dispatcher: failing.clone(),
            ..e
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut s = Session::new("r");
        s.begin_request("x");
        let err = e.execute_stage(&mut s, &task, &stage, &tx).await.unwrap_err();
        assert_eq!(err.ordinal, 1);
        assert_eq!(failing.calls_for(AgentId::Coordinator), 3);
        assert!(s.last_turn().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_engine_starts_no_stage() {
        let dispatcher = Arc::new(MockDispatcher::new().reply(AgentId::Coordinator, "plan"));
        let token = CancellationToken::new();
        let e = WorkflowEngine {
            dispatcher: dispatcher.clone(),
            ..engine(MockDispatcher::new(), 3)
        }
        .with_shutdown(token.clone());
        token.cancel();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Session::new("down");
        let outcome = e.execute_request(&mut s, "create notes.txt", &tx).await;

        let RunOutcome::Aborted(failure) = outcome else {
            panic!("expected aborted outcome, got {:?}", outcome);
        };
        assert_eq!(failure.ordinal, 1);
        assert_eq!(failure.cause, SHUTDOWN_CAUSE);
        assert_eq!(dispatcher.calls_for(AgentId::Coordinator), 0);
        let last = rx.try_recv().unwrap();
        assert!(last.is_terminal());
    }
}
