use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 时间戳设置
    pub timestamps: TimestampConfig,

    /// 编辑器设置
    pub editor: EditorConfig,

    /// 播放器设置
    pub player: PlayerConfig,

    /// 歌词存储设置
    pub store: StoreConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimestampConfig {
    /// 是否将毫秒四舍五入到百分之一秒（例如 `[00:01.123]` -> `[00:01.120]`）
    pub round_to_hundredths: bool,

    /// 同步歌词时从实际播放时间中减去的毫秒数，用于抵消反应时间
    pub delay_ms: i64,

    /// 微调当前行时间戳的步长（毫秒）
    pub nudge_step_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// 同步当前行之后是否自动跳到下一行
    pub advance_line_after_syncing: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// 打开文件时的初始音量 (0.0 - 1.0)
    pub initial_volume: f32,

    /// 播放位置刷新间隔（毫秒）
    pub position_poll_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// 歌词目录路径，未设置时歌词文件与音频文件放在一起
    pub lyrics_path: Option<String>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            round_to_hundredths: true,
            delay_ms: 0,
            nudge_step_ms: 100,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            initial_volume: 0.5,
            position_poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        let pkg_name = env!("CARGO_PKG_NAME");
        dirs::config_dir()
            .map(|p| p.join(pkg_name).join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(format!("{}-config.toml", pkg_name)))
    }

    /// 加载配置，支持从指定路径或默认路径加载
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);

        debug!("尝试从 {:?} 加载配置文件", config_path);

        if !config_path.exists() {
            debug!("配置文件 {:?} 不存在，将创建默认配置", config_path);
            let default_config = Config::default();
            let toml = toml::to_string_pretty(&default_config)?;

            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
                debug!("已确保目录 {:?} 存在", parent);
            }

            fs::write(&config_path, toml)?;
            info!("已创建默认配置文件: {:?}", config_path);
            return Ok(default_config);
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = match toml::from_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("解析配置文件 {:?} 失败: {}", config_path, e);
                warn!("由于解析错误，将加载默认配置");
                Config::default()
            }
        };

        debug!("已成功加载配置文件");
        Ok(config)
    }
}
