use std::ops::Range;

use crate::lyrics::LINE_TERMINATOR;

/// 编辑器文本缓冲区
///
/// 光标是 UTF-8 字节偏移，始终位于字符边界上。
/// 是否有未保存的修改通过与上次加载/保存时的文本快照比较得出。
#[derive(Debug, Clone, Default)]
pub struct EditorBuffer {
    text: String,
    cursor: usize,
    baseline: String,
}

impl EditorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 设置光标位置，超出范围时截断，落在多字节字符中间时退到字符开头
    pub fn set_cursor(&mut self, offset: usize) {
        self.cursor = self.clamp_offset(offset);
    }

    /// 替换全部文本，不影响快照
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.cursor = self.clamp_offset(self.cursor);
    }

    /// 替换全部文本并将其作为新的快照
    pub fn reset(&mut self, text: impl Into<String>) {
        self.set_text(text);
        self.mark_saved();
    }

    /// 将当前文本记录为已保存
    pub fn mark_saved(&mut self) {
        self.baseline.clone_from(&self.text);
    }

    pub fn is_dirty(&self) -> bool {
        self.text != self.baseline
    }

    /// 替换指定范围的文本，范围必须位于字符边界上
    pub fn replace_range(&mut self, range: Range<usize>, replacement: &str) {
        self.text.replace_range(range, replacement);
        self.cursor = self.clamp_offset(self.cursor);
    }

    /// 在光标处插入文本，光标移到插入内容之后
    pub fn insert_at_cursor(&mut self, content: &str) {
        let cursor = self.cursor;
        self.text.insert_str(cursor, content);
        self.cursor = cursor + content.len();
    }

    /// 光标所在行的起始偏移
    pub fn line_start(&self) -> usize {
        self.line_start_of(self.cursor)
    }

    /// 指定偏移所在行的起始偏移：向前查找最近的换行符
    pub fn line_start_of(&self, offset: usize) -> usize {
        let offset = self.clamp_offset(offset);
        self.text[..offset]
            .rfind(LINE_TERMINATOR)
            .map(|index| index + LINE_TERMINATOR.len())
            .unwrap_or(0)
    }

    /// 指定偏移所在行的结束偏移（不含换行符）
    pub fn line_end_of(&self, offset: usize) -> usize {
        let offset = self.clamp_offset(offset);
        self.text[offset..]
            .find(LINE_TERMINATOR)
            .map(|index| offset + index)
            .unwrap_or(self.text.len())
    }

    /// 光标所在行的内容（不含换行符）
    pub fn current_line(&self) -> &str {
        let start = self.line_start();
        &self.text[start..self.line_end_of(start)]
    }

    fn clamp_offset(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}
