//! 测试用派发替身：按 Agent 预设回复脚本

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::AgentId;

use super::{AgentDispatcher, DispatchError, DispatchRequest};

/// 预设的一次回复
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// 运行时返回空文本
    Empty,
    Error(String),
    /// 延迟后返回文本（用于超时测试）
    Delayed(Duration, String),
}

/// Mock 派发器：每个 Agent 一个回复队列，队列只剩一条时重复使用
#[derive(Debug, Default)]
pub struct MockDispatcher {
    scripts: Mutex<HashMap<AgentId, VecDeque<MockReply>>>,
    calls: Mutex<Vec<DispatchRequest>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, agent: AgentId, text: impl Into<String>) -> Self {
        self.script(agent, MockReply::Text(text.into()))
    }

    pub fn script(self, agent: AgentId, reply: MockReply) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(agent).or_default().push_back(reply);
        }
        self
    }

    pub fn calls(&self) -> Vec<DispatchRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, agent: AgentId) -> usize {
        self.calls().iter().filter(|c| c.agent == agent).count()
    }

    fn next_reply(&self, agent: AgentId) -> Option<MockReply> {
        let mut scripts = self.scripts.lock().ok()?;
        let queue = scripts.get_mut(&agent)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl AgentDispatcher for MockDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<String, DispatchError> {
        let agent = request.agent;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }
        match self.next_reply(agent) {
            Some(MockReply::Text(t)) => Ok(t),
            Some(MockReply::Delayed(d, t)) => {
                tokio::time::sleep(d).await;
                Ok(t)
            }
            Some(MockReply::Error(e)) => Err(DispatchError::Remote(e)),
            Some(MockReply::Empty) | None => Err(DispatchError::EmptyResponse),
        }
    }

    fn provider(&self) -> &str {
        "mock"
    }
}
