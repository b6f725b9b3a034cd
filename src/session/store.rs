//! 会话存储：按会话键签出 / 签入，后台淘汰空闲会话
//!
//! 运行期间会话被引擎独占（槽位里只留只读快照），因此同一键不会并发运行，
//! 空闲淘汰也不会碰到运行中的会话。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::model::{Session, SessionSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session '{0}' already has an active workflow run")]
    Busy(String),
    #[error("session '{0}' not found")]
    NotFound(String),
}

enum Slot {
    Idle(Box<Session>),
    /// 签出中，保存签出时的快照
    Running(Box<SessionSnapshot>),
}

struct Entry {
    slot: Slot,
    /// 前端确认送达的最后一条消息
    last_confirmed: Option<u64>,
}

pub struct SessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// 签出会话（不存在则创建）；已在运行时返回 Busy
    pub async fn checkout(&self, id: &str) -> Result<Session, SessionError> {
        let mut entries = self.entries.write().await;
        let (session, last_confirmed) = match entries.remove(id) {
            Some(entry @ Entry { slot: Slot::Running(_), .. }) => {
                entries.insert(id.to_string(), entry);
                return Err(SessionError::Busy(id.to_string()));
            }
            Some(Entry {
                slot: Slot::Idle(session),
                last_confirmed,
            }) => (*session, last_confirmed),
            None => {
                tracing::info!(session = id, "Creating session");
                (Session::new(id), None)
            }
        };

        let mut snapshot = session.snapshot(true);
        snapshot.last_confirmed_message = last_confirmed;
        entries.insert(
            id.to_string(),
            Entry {
                slot: Slot::Running(Box::new(snapshot)),
                last_confirmed,
            },
        );
        Ok(session)
    }

    /// 签入会话并刷新活跃时间
    pub async fn checkin(&self, mut session: Session) {
        session.last_active = Instant::now();
        let mut entries = self.entries.write().await;
        let last_confirmed = entries.get(&session.id).and_then(|e| e.last_confirmed);
        entries.insert(
            session.id.clone(),
            Entry {
                slot: Slot::Idle(Box::new(session)),
                last_confirmed,
            },
        );
    }

    pub async fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        let mut snapshot = match &entry.slot {
            Slot::Idle(session) => session.snapshot(false),
            Slot::Running(snapshot) => (**snapshot).clone(),
        };
        snapshot.last_confirmed_message = entry.last_confirmed;
        Some(snapshot)
    }

    /// 移除会话（无论是否在运行），返回是否存在
    pub async fn discard(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// 记录前端送达确认
    pub async fn confirm(&self, id: &str, message_id: u64) -> Result<(), SessionError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        entry.last_confirmed = Some(message_id);
        Ok(())
    }

    /// 淘汰空闲超时的会话，返回淘汰数量；运行中的会话不受影响
    pub async fn sweep_idle(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| match &entry.slot {
            Slot::Idle(session) => !session.is_expired(self.idle_timeout),
            Slot::Running(_) => true,
        });
        before - entries.len()
    }

    /// 启动后台淘汰任务，token 取消时退出
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = store.sweep_idle().await;
                        if evicted > 0 {
                            tracing::info!(evicted, "Evicted idle sessions");
                        }
                    }
                }
            }
        })
    }

    /// (空闲, 运行中)
    pub async fn counts(&self) -> (usize, usize) {
        let entries = self.entries.read().await;
        let running = entries
            .values()
            .filter(|e| matches!(e.slot, Slot::Running(_)))
            .count();
        (entries.len() - running, running)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
