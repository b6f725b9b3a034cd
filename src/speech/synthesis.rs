//! 语音合成服务客户端

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("synthesis request failed: {0}")]
    Request(String),
    #[error("synthesis service answered {0}")]
    Status(u16),
}

/// 合成能力抽象
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// 生成 `voice` 朗读 `text` 的音频（不取回音频数据）
    async fn synthesize(&self, text: &str, voice: &str) -> Result<(), SpeechError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
    return_audio: bool,
}

/// HTTP 合成服务：POST {base_url}/tts
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSynthesizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/tts", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<(), SpeechError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesisRequest {
                text,
                voice,
                return_audio: false,
            })
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// 测试用合成器
#[derive(Debug, Default)]
pub struct MockSynthesizer {
    fail: bool,
    calls: AtomicUsize,
}

impl MockSynthesizer {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str, _voice: &str) -> Result<(), SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(SpeechError::Status(503))
        } else {
            Ok(())
        }
    }
}
