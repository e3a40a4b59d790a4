//! 播放事件和状态定义

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

/// 播放事件（音频线程 -> 调用方）
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// 播放进度
    Progress { elapsed: Duration, frames: u64 },
    /// 解码器读完
    Ended { elapsed: Duration },
    /// 播放中途解码失败
    Failed { elapsed: Duration, message: String },
}

impl PlaybackEvent {
    /// 播放是否已结束（正常结束或失败）
    pub fn is_ended(&self) -> bool {
        !matches!(self, PlaybackEvent::Progress { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PlaybackEvent::Progress { elapsed, .. }
            | PlaybackEvent::Ended { elapsed }
            | PlaybackEvent::Failed { elapsed, .. } => *elapsed,
        }
    }
}

/// 创建事件通道
pub fn event_channel(capacity: usize) -> (Sender<PlaybackEvent>, Receiver<PlaybackEvent>) {
    bounded(capacity.max(1))
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Stopped,
    Ended,
}

/// 当前曲目信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
}
