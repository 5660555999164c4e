// 错误类型定义

use std::path::PathBuf;

use thiserror::Error;

/// 音频流相关错误
#[derive(Debug, Error)]
pub enum AudioError {
    /// 文件扩展名无法识别，不支持流式读取
    #[error("不支持的音频格式: {0}")]
    UnsupportedFormat(String),

    /// 声道数或位深无效
    #[error("无效的音频格式: {channels} 声道, {bits_per_sample} 位")]
    InvalidFormat { channels: u16, bits_per_sample: u16 },

    /// 音频文件不存在
    #[error("音频文件不存在: {0:?}")]
    NotFound(PathBuf),

    #[error("音频 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV 解码错误: {0}")]
    Decode(#[from] hound::Error),

    /// MP3 或 AIFF 无法识别或解码
    #[error("音频解码错误: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    /// 输出设备无法初始化
    #[error("音频输出错误: {0}")]
    Output(String),
}

/// 歌词存储相关错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("歌词文件读写失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 目标文件被占用或只读
    #[error("歌词文件被锁定: {0:?}")]
    Locked(PathBuf),
}
