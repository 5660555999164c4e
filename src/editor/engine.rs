use std::time::Instant;

use tracing::{debug, info};

use crate::config::Config;
use crate::editor::EditorBuffer;
use crate::lyrics::{Lyrics, Timestamp, TimestampCodec};

/// 编辑器使用的设置，由外部配置传入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorSettings {
    /// 写入时间戳时是否四舍五入到百分之一秒
    pub round_to_hundredths: bool,
    /// 从捕获的播放时间中减去的毫秒数
    pub delay_ms: i64,
    /// 同步当前行之后是否跳到下一行
    pub advance_line_after_syncing: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EditorSettings {
    fn from(config: &Config) -> Self {
        Self {
            round_to_hundredths: config.timestamps.round_to_hundredths,
            delay_ms: config.timestamps.delay_ms,
            advance_line_after_syncing: config.editor.advance_line_after_syncing,
        }
    }
}

/// 向播放器请求当前播放时间，记录发送时刻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampRequest {
    sent_at: Instant,
}

impl TimestampRequest {
    pub fn new() -> Self {
        Self::sent_at(Instant::now())
    }

    pub fn sent_at(sent_at: Instant) -> Self {
        Self { sent_at }
    }

    pub fn sent_time(&self) -> Instant {
        self.sent_at
    }
}

impl Default for TimestampRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// 播放器对时间请求的响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampResponse {
    /// 播放器处理请求时的播放位置
    pub playback_time: Timestamp,
    /// 对应的请求
    pub request: TimestampRequest,
}

/// 歌词编辑器
///
/// 持有一份可变文本和光标，提供以“当前行”为单位的时间标签插入、删除和查询。
pub struct LyricsEditor {
    buffer: EditorBuffer,
    codec: TimestampCodec,
    settings: EditorSettings,
}

impl LyricsEditor {
    /// 创建新的编辑器
    pub fn new(settings: EditorSettings) -> Self {
        Self::with_codec(settings, TimestampCodec::default())
    }

    /// 使用自定义的时间标签格式创建编辑器
    pub fn with_codec(settings: EditorSettings, codec: TimestampCodec) -> Self {
        Self {
            buffer: EditorBuffer::new(),
            codec,
            settings,
        }
    }

    /// 更新设置
    pub fn apply_settings(&mut self, settings: EditorSettings) {
        debug!("编辑器设置已更新: {:?}", settings);
        self.settings = settings;
    }

    pub fn settings(&self) -> EditorSettings {
        self.settings
    }

    pub fn buffer(&self) -> &EditorBuffer {
        &self.buffer
    }

    pub fn text(&self) -> &str {
        self.buffer.text()
    }

    pub fn cursor(&self) -> usize {
        self.buffer.cursor()
    }

    pub fn set_cursor(&mut self, offset: usize) {
        self.buffer.set_cursor(offset);
    }

    /// 在光标处输入文本
    pub fn insert_text(&mut self, content: &str) {
        self.buffer.insert_at_cursor(content);
    }

    /// 光标所在行的起始偏移
    pub fn line_start_offset(&self) -> usize {
        self.buffer.line_start()
    }

    /// 光标所在行的时间标签
    pub fn current_line_timestamp(&self) -> Option<Timestamp> {
        self.codec
            .extract_tag(self.buffer.current_line())
            .map(|(timestamp, _)| timestamp)
    }

    /// 生成获取播放时间的请求
    pub fn request_playback_timestamp(&self) -> TimestampRequest {
        TimestampRequest::new()
    }

    /// 将播放器返回的时间写入当前行，返回实际写入的时间戳
    pub fn insert_playback_timestamp(&mut self, response: &TimestampResponse) -> Timestamp {
        self.insert_playback_timestamp_at(response, Instant::now())
    }

    /// 同 [`insert_playback_timestamp`](Self::insert_playback_timestamp)，`now` 为处理响应的时刻
    pub fn insert_playback_timestamp_at(
        &mut self,
        response: &TimestampResponse,
        now: Instant,
    ) -> Timestamp {
        let timestamp = self.effective_timestamp(response, now);
        let written = self.retag_current_line(timestamp);

        if self.settings.advance_line_after_syncing {
            self.move_to_next_line();
        }

        written
    }

    /// 扣除请求往返延迟和配置的提前量后的时间
    pub fn effective_timestamp(&self, response: &TimestampResponse, now: Instant) -> Timestamp {
        let latency = now.saturating_duration_since(response.request.sent_at);
        let compensated = response.playback_time.saturating_sub(latency);
        debug!(
            "播放时间 {}，请求延迟 {:?}，提前量 {}ms",
            response.playback_time, latency, self.settings.delay_ms
        );
        compensated.offset_by(self.settings.delay_ms.saturating_neg())
    }

    /// 按给定毫秒数调整当前行的时间标签，当前行没有标签时不做任何事
    pub fn nudge_current_line_timestamp(&mut self, delta_ms: i64) -> Option<Timestamp> {
        let current = self.current_line_timestamp()?;
        Some(self.retag_current_line(current.offset_by(delta_ms)))
    }

    /// 当前行的时间标签，供播放器跳转使用
    pub fn jump_to_current_line_timestamp(&self) -> Option<Timestamp> {
        if self.buffer.text().trim().is_empty() {
            return None;
        }
        self.current_line_timestamp()
    }

    /// 删除当前行已有的标签（如果有），然后在行首写入新标签
    fn retag_current_line(&mut self, timestamp: Timestamp) -> Timestamp {
        let line_start = self.buffer.line_start();
        let cursor = self.buffer.cursor();

        let removed_len = self
            .codec
            .extract_tag(self.buffer.current_line())
            .map(|(_, rest_offset)| rest_offset)
            .unwrap_or(0);

        let tag = self
            .codec
            .format(timestamp, self.settings.round_to_hundredths);
        self.buffer
            .replace_range(line_start..line_start + removed_len, &tag);

        // 光标保持在同一行内的相对位置
        let relative = cursor - line_start;
        let new_cursor = if relative == 0 {
            line_start
        } else if relative <= removed_len {
            line_start + tag.len()
        } else {
            cursor - removed_len + tag.len()
        };
        self.buffer.set_cursor(new_cursor);

        let written = if self.settings.round_to_hundredths {
            timestamp.round_to_hundredths()
        } else {
            timestamp
        };
        debug!("当前行时间标签已设置为 {}", tag);
        written
    }

    /// 光标移到下一行行首，没有下一行时移到文本末尾
    pub fn move_to_next_line(&mut self) {
        let line_end = self.buffer.line_end_of(self.buffer.cursor());
        if line_end < self.buffer.len() {
            self.buffer.set_cursor(line_end + 1);
        } else {
            self.buffer.set_cursor(line_end);
        }
    }

    /// 光标移到上一行行首
    pub fn move_to_previous_line(&mut self) {
        let line_start = self.buffer.line_start();
        if line_start == 0 {
            self.buffer.set_cursor(0);
        } else {
            let previous = self.buffer.line_start_of(line_start - 1);
            self.buffer.set_cursor(previous);
        }
    }

    /// 将编辑器内容解析为歌词
    pub fn export_document(&self) -> Lyrics {
        Lyrics::parse(self.buffer.text())
    }

    /// 加载歌词，清除未保存标记
    pub fn load_document(&mut self, lyrics: &Lyrics) {
        self.buffer.reset(lyrics.serialize(true));
        self.buffer.set_cursor(0);
        info!("已加载 {} 行歌词到编辑器", lyrics.len());
    }

    /// 用任意文本替换编辑器内容（例如搜索得到的歌词），保留上次保存的快照
    pub fn load_text(&mut self, text: &str) {
        self.buffer.set_text(text);
        self.buffer.set_cursor(0);
    }

    /// 将当前内容标记为已保存
    pub fn mark_saved(&mut self) {
        self.buffer.mark_saved();
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }
}

impl Default for LyricsEditor {
    fn default() -> Self {
        Self::new(EditorSettings::default())
    }
}
