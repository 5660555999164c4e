use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::audio::{CpalOutput, OutputDevice};
use crate::config::Config;
use crate::editor::{EditorSettings, LyricsEditor};
use crate::lyrics::{Lyrics, LrcFileStore, SyncedLyricsStore, Timestamp};
use crate::player::{PlayerSettings, PositionPoller, TransportController};

/// 为每次打开的音频创建输出设备
pub type OutputFactory = Box<dyn Fn() -> Box<dyn OutputDevice> + Send + Sync>;

/// 应用核心
///
/// 把编辑器、播放控制器和歌词存储串起来：打开音频时加载歌词，
/// 同步时向播放器请求时间并写回编辑器，保存时交给存储。
pub struct App {
    config: Arc<Config>,
    editor: LyricsEditor,
    transport: TransportController,
    store: Box<dyn SyncedLyricsStore>,
    output_factory: OutputFactory,
}

impl App {
    /// 创建新应用实例，使用 `.lrc` 文件存储并输出到系统默认声卡
    pub fn new(config: Arc<Config>) -> Self {
        let store = Box::new(LrcFileStore::new(&config.store));
        let output_factory: OutputFactory =
            Box::new(|| -> Box<dyn OutputDevice> { Box::new(CpalOutput::new()) });
        Self::with_parts(config, store, output_factory)
    }

    /// 使用指定的存储和输出设备创建
    pub fn with_parts(
        config: Arc<Config>,
        store: Box<dyn SyncedLyricsStore>,
        output_factory: OutputFactory,
    ) -> Self {
        debug!("使用歌词存储: {}", store.name());
        Self {
            editor: LyricsEditor::new(EditorSettings::from(config.as_ref())),
            transport: TransportController::new(PlayerSettings::from(config.as_ref())),
            config,
            store,
            output_factory,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn editor(&self) -> &LyricsEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut LyricsEditor {
        &mut self.editor
    }

    pub fn transport(&self) -> &TransportController {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportController {
        &mut self.transport
    }

    /// 当前打开的音频文件
    pub fn current_track(&self) -> Option<PathBuf> {
        self.transport.path().map(Path::to_path_buf)
    }

    /// 应用新的配置
    pub fn apply_config(&mut self, config: Config) {
        self.editor.apply_settings(EditorSettings::from(&config));
        self.transport.apply_settings(PlayerSettings::from(&config));
        self.config = Arc::new(config);
        info!("已应用新的配置");
    }

    /// 打开音频文件并加载已保存的同步歌词
    pub fn open_track(&mut self, path: &Path) -> Result<()> {
        self.transport.open(path, (self.output_factory)())?;
        self.transport.set_volume(self.config.player.initial_volume);

        let lyrics = match self.store.load(path) {
            Ok(Some(entries)) => Lyrics::from_synced_text(&entries),
            Ok(None) => {
                debug!("{:?} 没有已保存的歌词", path);
                Lyrics::default()
            }
            Err(e) => {
                warn!("读取已保存的歌词失败: {}", e);
                Lyrics::default()
            }
        };
        self.editor.load_document(&lyrics);

        info!("当前音轨: {:?}", path);
        Ok(())
    }

    /// 关闭当前音频
    pub fn close(&mut self) {
        if self.editor.is_dirty() {
            warn!("关闭音频时仍有未保存的歌词修改");
        }
        self.transport.close();
    }

    /// 用外部选择的歌词文本替换编辑器内容
    pub fn select_lyrics_text(&mut self, text: &str) {
        self.editor.load_text(text);
        debug!("已载入选择的歌词文本");
    }

    /// 以当前播放时间标记当前行
    pub fn sync_current_line(&mut self) -> Timestamp {
        self.transport.process_output_events();

        let request = self.editor.request_playback_timestamp();
        let response = self.transport.resolve_timestamp(request);
        let inserted = self.editor.insert_playback_timestamp(&response);

        debug!("当前行已标记为 {}", inserted);
        inserted
    }

    /// 跳转到当前行的时间标签
    pub fn jump_to_current_line(&mut self) -> Result<Option<Timestamp>> {
        let Some(target) = self.editor.jump_to_current_line_timestamp() else {
            debug!("当前行没有时间标签，忽略跳转");
            return Ok(None);
        };

        self.transport.seek(target)?;
        Ok(Some(target))
    }

    /// 按配置的步长调整当前行的时间标签
    pub fn nudge_current_line(&mut self, forward: bool) -> Option<Timestamp> {
        let step = i64::try_from(self.config.timestamps.nudge_step_ms).unwrap_or(i64::MAX);
        let delta = if forward { step } else { -step };
        self.editor.nudge_current_line_timestamp(delta)
    }

    /// 保存歌词；失败时编辑器保持未保存状态
    pub fn save(&mut self) -> Result<()> {
        let path = self
            .transport
            .path()
            .ok_or_else(|| anyhow!("未打开音频文件，无法保存歌词"))?
            .to_path_buf();

        let entries = self.editor.export_document().to_synced_text();
        if let Err(e) = self.store.save(&path, &entries) {
            warn!("保存歌词失败: {}", e);
            return Err(e.into());
        }

        self.editor.mark_saved();
        info!("已保存 {} 行歌词", entries.len());
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.editor.is_dirty()
    }

    /// 为当前音频启动位置轮询，未打开文件时返回 `None`
    pub fn spawn_position_poller(&self) -> Option<(PositionPoller, watch::Receiver<Timestamp>)> {
        let source = self.transport.position_source()?;
        Some(PositionPoller::spawn(
            source,
            self.transport.subscribe_state(),
            self.transport.settings().position_poll_interval,
        ))
    }
}
