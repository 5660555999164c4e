use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::normalize_volume;
use crate::config::Config;
use crate::lyrics::Timestamp;

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// 最近一次停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StoppedReason {
    #[default]
    None,
    ByUser,
    ByEndOfFile,
}

/// 播放器状态快照，用于展示
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub path: Option<PathBuf>,
    pub state: PlaybackState,
    pub stopped_reason: StoppedReason,
    pub position: Timestamp,
    pub duration: Timestamp,
    pub volume: f32,
}

/// 播放器设置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSettings {
    /// 打开文件时的音量
    pub initial_volume: f32,
    /// 播放位置的刷新间隔
    pub position_poll_interval: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PlayerSettings {
    fn from(config: &Config) -> Self {
        Self {
            initial_volume: normalize_volume(config.player.initial_volume),
            position_poll_interval: Duration::from_millis(
                config.player.position_poll_interval_ms.max(1),
            ),
        }
    }
}
