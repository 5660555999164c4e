use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::lyrics::{Lyrics, SyncedText};

/// 同步歌词的持久化接口
///
/// 对应音频文件元数据中的同步歌词帧：读取时得到 (毫秒, 文本) 列表，保存时写回同样的列表。
pub trait SyncedLyricsStore: Send + Sync {
    /// 获取存储名称
    fn name(&self) -> &str;

    /// 读取音频文件对应的同步歌词，不存在时返回 `None`
    fn load(&self, audio_path: &Path) -> Result<Option<Vec<SyncedText>>, StoreError>;

    /// 保存同步歌词，失败时不得留下写了一半的内容
    fn save(&self, audio_path: &Path, entries: &[SyncedText]) -> Result<(), StoreError>;
}

/// 以 `.lrc` 文件保存同步歌词
pub struct LrcFileStore {
    /// 歌词目录，未设置时歌词文件与音频文件放在一起
    lyrics_path: Option<PathBuf>,
}

impl LrcFileStore {
    /// 创建新的 LRC 文件存储
    pub fn new(config: &StoreConfig) -> Self {
        // 处理路径，将~替换为用户家目录
        let lyrics_path = config.lyrics_path.as_ref().map(|path| {
            if let Some(stripped) = path.strip_prefix("~/") {
                let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                home.join(stripped)
            } else {
                PathBuf::from(path)
            }
        });

        Self { lyrics_path }
    }

    /// 歌词文件与音频文件放在同一目录
    pub fn sidecar() -> Self {
        Self { lyrics_path: None }
    }

    /// 计算音频文件对应的歌词文件路径
    pub fn lrc_path(&self, audio_path: &Path) -> PathBuf {
        match (&self.lyrics_path, audio_path.file_name()) {
            (Some(dir), Some(file_name)) => dir.join(file_name).with_extension("lrc"),
            _ => audio_path.with_extension("lrc"),
        }
    }

    fn write_atomically(path: &Path, content: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // 先写临时文件再重命名，避免目标文件只写了一半
        let tmp_path = path.with_extension("lrc.tmp");
        if let Err(e) = fs::write(&tmp_path, content) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        Ok(())
    }
}

impl SyncedLyricsStore for LrcFileStore {
    fn name(&self) -> &str {
        "lrc"
    }

    fn load(&self, audio_path: &Path) -> Result<Option<Vec<SyncedText>>, StoreError> {
        let path = self.lrc_path(audio_path);
        if !path.is_file() {
            debug!("歌词文件不存在: {:?}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let lyrics = Lyrics::parse(&content);
        info!("成功加载歌词文件: {:?}, {} 行", path, lyrics.len());

        Ok(Some(lyrics.to_synced_text()))
    }

    fn save(&self, audio_path: &Path, entries: &[SyncedText]) -> Result<(), StoreError> {
        let path = self.lrc_path(audio_path);
        let content = Lyrics::from_synced_text(entries).serialize(false);

        match Self::write_atomically(&path, &content) {
            Ok(()) => {
                info!("已保存歌词文件: {:?}, {} 行", path, entries.len());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("歌词文件被锁定，无法保存: {:?}", path);
                Err(StoreError::Locked(path))
            }
            Err(source) => {
                warn!("保存歌词文件失败: {:?}: {}", path, source);
                Err(StoreError::Io { path, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time_ms: u64, text: &str) -> SyncedText {
        SyncedText {
            time_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_lrc_path() {
        let store = LrcFileStore::sidecar();
        assert_eq!(
            store.lrc_path(Path::new("/music/song.wav")),
            PathBuf::from("/music/song.lrc")
        );

        let store = LrcFileStore::new(&StoreConfig {
            lyrics_path: Some("/lyrics".to_string()),
        });
        assert_eq!(
            store.lrc_path(Path::new("/music/song.wav")),
            PathBuf::from("/lyrics/song.lrc")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("track.wav");
        let store = LrcFileStore::sidecar();

        assert_eq!(store.load(&audio_path).unwrap(), None);

        let entries = vec![entry(1200, "Hello\nthere"), entry(3456, "World")];
        store.save(&audio_path, &entries).unwrap();

        let content = fs::read_to_string(dir.path().join("track.lrc")).unwrap();
        assert_eq!(content, "[00:01.200]Hello\nthere\n[00:03.456]World");
        assert!(!dir.path().join("track.lrc.tmp").exists());

        assert_eq!(store.load(&audio_path).unwrap(), Some(entries));
    }

    #[test]
    fn test_save_failure_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("track.wav");
        // 用同名目录占住目标路径，使重命名失败
        fs::create_dir(dir.path().join("track.lrc")).unwrap();

        let store = LrcFileStore::sidecar();
        assert!(store.save(&audio_path, &[entry(0, "x")]).is_err());
        assert!(!dir.path().join("track.lrc.tmp").exists());
    }
}
