//! 播放票据桥

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Mutex};

use crate::config::SpeechSection;

use super::SpeechSynthesizer;

#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    /// 等待播放完成回调的上限
    pub playback_timeout: Duration,
    /// 合成失败时每个字符的停顿（毫秒）
    pub fallback_ms_per_char: u64,
    pub fallback_cap: Duration,
}

impl PlaybackSettings {
    /// 按文本长度估算的停顿，封顶 fallback_cap
    pub fn fallback_pause(&self, text: &str) -> Duration {
        let chars = text.chars().count() as u64;
        Duration::from_millis(chars.saturating_mul(self.fallback_ms_per_char)).min(self.fallback_cap)
    }
}

impl From<&SpeechSection> for PlaybackSettings {
    fn from(cfg: &SpeechSection) -> Self {
        Self {
            playback_timeout: cfg.playback_timeout(),
            fallback_ms_per_char: cfg.fallback_ms_per_char,
            fallback_cap: Duration::from_millis(cfg.fallback_cap_ms),
        }
    }
}

/// 待播放通知（播放端轮询取走）
#[derive(Debug, Clone, Serialize)]
pub struct PendingPlayback {
    pub text: String,
    pub voice: String,
    pub ticket_id: u64,
    pub requested_at: i64,
}

struct Ticket {
    id: u64,
    done: oneshot::Sender<()>,
}

/// 每个语音身份最多一张未解决票据；新票据顶替旧票据，旧等待者立即返回 false
pub struct AudioSyncBridge {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    settings: PlaybackSettings,
    tickets: Mutex<HashMap<String, Ticket>>,
    pending: Mutex<Option<PendingPlayback>>,
    next_id: AtomicU64,
}

impl AudioSyncBridge {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, settings: PlaybackSettings) -> Self {
        Self {
            synthesizer,
            settings,
            tickets: Mutex::new(HashMap::new()),
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// 合成并等待播放完成；返回是否确认播放完毕
    pub async fn speak_and_wait(&self, text: &str, voice: &str) -> bool {
        if let Err(e) = self.synthesizer.synthesize(text, voice).await {
            let pause = self.settings.fallback_pause(text);
            tracing::warn!(voice, "Speech synthesis failed ({}), pausing {:?} instead", e, pause);
            tokio::time::sleep(pause).await;
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut tickets = self.tickets.lock().await;
            if let Some(previous) = tickets.insert(voice.to_string(), Ticket { id, done: tx }) {
                // 丢弃旧 sender，旧等待者收到 RecvError
                tracing::warn!(voice, superseded = previous.id, ticket = id, "Playback ticket superseded");
            }
        }
        *self.pending.lock().await = Some(PendingPlayback {
            text: text.to_string(),
            voice: voice.to_string(),
            ticket_id: id,
            requested_at: chrono::Utc::now().timestamp_millis(),
        });
        tracing::debug!(voice, ticket = id, "Playback ticket registered");

        match tokio::time::timeout(self.settings.playback_timeout, rx).await {
            Ok(Ok(())) => {
                tracing::debug!(voice, ticket = id, "Playback confirmed");
                true
            }
            Ok(Err(_)) => {
                tracing::debug!(voice, ticket = id, "Playback ticket dropped before completion");
                false
            }
            Err(_) => {
                let mut tickets = self.tickets.lock().await;
                if tickets.get(voice).map(|t| t.id) == Some(id) {
                    tickets.remove(voice);
                }
                tracing::warn!(
                    voice,
                    ticket = id,
                    "Playback not confirmed within {:?}",
                    self.settings.playback_timeout
                );
                false
            }
        }
    }

    /// 播放端回调：解决该语音的票据；没有待解决票据时返回 false
    pub async fn complete(&self, voice: &str) -> bool {
        let ticket = self.tickets.lock().await.remove(voice);
        match ticket {
            Some(ticket) => {
                let delivered = ticket.done.send(()).is_ok();
                tracing::info!(voice, ticket = ticket.id, delivered, "Playback completed");
                delivered
            }
            None => {
                tracing::debug!(voice, "Playback completion with no outstanding ticket");
                false
            }
        }
    }

    /// 取走待播放通知
    pub async fn take_pending(&self) -> Option<PendingPlayback> {
        self.pending.lock().await.take()
    }

    pub async fn outstanding(&self) -> usize {
        self.tickets.lock().await.len()
    }

    /// 释放全部票据（等待者返回 false），返回释放数量
    pub async fn release_all(&self) -> usize {
        let mut tickets = self.tickets.lock().await;
        let n = tickets.len();
        tickets.clear();
        *self.pending.lock().await = None;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::MockSynthesizer;
    use std::time::Instant;

    fn bridge(synth: MockSynthesizer, timeout: Duration) -> Arc<AudioSyncBridge> {
        Arc::new(AudioSyncBridge::new(
            Arc::new(synth),
            PlaybackSettings {
                playback_timeout: timeout,
                fallback_ms_per_char: 10,
                fallback_cap: Duration::from_millis(100),
            },
        ))
    }

    async fn wait_for_ticket(bridge: &AudioSyncBridge) {
        while bridge.outstanding().await == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_fallback_pause_is_capped() {
        let s = PlaybackSettings {
            playback_timeout: Duration::from_secs(1),
            fallback_ms_per_char: 50,
            fallback_cap: Duration::from_millis(5000),
        };
        assert_eq!(s.fallback_pause("abcd"), Duration::from_millis(200));
        assert_eq!(s.fallback_pause(&"x".repeat(1000)), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_completion_resolves_waiter() {
        let b = bridge(MockSynthesizer::succeeding(), Duration::from_secs(5));
        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.speak_and_wait("Done.", "lada").await })
        };
        wait_for_ticket(&b).await;

        let pending = b.take_pending().await.unwrap();
        assert_eq!(pending.voice, "lada");
        assert!(b.take_pending().await.is_none());

        assert!(b.complete("lada").await);
        assert!(waiter.await.unwrap());
        assert_eq!(b.outstanding().await, 0);
        assert!(!b.complete("lada").await);
    }

    #[tokio::test]
    async fn test_synthesis_failure_pauses_and_returns_false() {
        let b = bridge(MockSynthesizer::failing(), Duration::from_secs(5));
        let started = Instant::now();
        let played = b.speak_and_wait("twenty characters!!", "dmytro").await;
        assert!(!played);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(b.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_second_ticket_supersedes_first() {
        let b = bridge(MockSynthesizer::succeeding(), Duration::from_secs(5));
        let first = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.speak_and_wait("one", "mykyta").await })
        };
        wait_for_ticket(&b).await;

        let second = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.speak_and_wait("two", "mykyta").await })
        };

        // 第一位等待者立即因被顶替而返回
        let first_played = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .expect("superseded waiter must not block")
            .unwrap();
        assert!(!first_played);

        assert!(b.complete("mykyta").await);
        assert!(second.await.unwrap());
    }

    #[tokio::test]
    async fn test_timeout_removes_only_own_ticket() {
        let b = bridge(MockSynthesizer::succeeding(), Duration::from_millis(50));
        assert!(!b.speak_and_wait("hello", "dmytro").await);
        assert_eq!(b.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_release_all_frees_pending_waiter() {
        let b = bridge(MockSynthesizer::succeeding(), Duration::from_secs(30));
        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.speak_and_wait("Working on it.", "dmytro").await })
        };
        wait_for_ticket(&b).await;

        let started = Instant::now();
        assert_eq!(b.release_all().await, 1);
        let played = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("released waiter must return at once")
            .unwrap();
        assert!(!played);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(b.outstanding().await, 0);
        assert!(b.take_pending().await.is_none());
        assert!(!b.complete("dmytro").await);
    }
}
