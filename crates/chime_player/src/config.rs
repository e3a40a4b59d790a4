//! 播放器配置

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 配置错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 播放器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 进度事件的最小间隔（毫秒）
    pub progress_interval_ms: u64,
    /// 事件通道容量，满时丢弃新事件
    pub event_capacity: usize,
    /// 每次回调请求的帧数
    pub period_frames: Option<u32>,
    /// 开始播放时设置的主音量
    pub initial_volume: Option<f32>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 100,
            event_capacity: 64,
            period_frames: None,
            initial_volume: None,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        if self.period_frames == Some(0) {
            return Err(ConfigError::Invalid("period_frames must be > 0".into()));
        }
        if let Some(v) = self.initial_volume {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!(
                    "initial_volume {} out of range 0.0 - 1.0",
                    v
                )));
            }
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
