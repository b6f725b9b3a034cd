//! 语音播放同步：合成请求 + 按语音身份登记的完成票据
//!
//! 合成只生成音频（return_audio=false），由外部播放端轮询 `/tts/pending` 拉取并播放，
//! 播完后回调 `/tts/completed`。工作流在票据解决前不会推进到下一阶段。

pub mod bridge;
pub mod synthesis;

pub use bridge::{AudioSyncBridge, PendingPlayback, PlaybackSettings};
pub use synthesis::{HttpSynthesizer, MockSynthesizer, SpeechError, SpeechSynthesizer};
