use serde::{Deserialize, Serialize};
use tracing::debug;

use super::timestamp::{extract_tag, format_tag, Timestamp};

/// 文本中使用的换行符
pub const LINE_TERMINATOR: &str = "\n";

/// 单行同步歌词
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricLine {
    /// 该行开始显示的时间
    pub timestamp: Timestamp,
    /// 标签之后的歌词文本，可能包含续行合并进来的换行
    pub text: String,
}

impl LyricLine {
    pub fn new(timestamp: Timestamp, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

/// 标签存储中的一条同步文本：(毫秒, 文本)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedText {
    pub time_ms: u64,
    pub text: String,
}

/// 完整的同步歌词，行顺序即文件顺序，不按时间重新排序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyrics {
    pub lines: Vec<LyricLine>,
}

impl Lyrics {
    pub fn new(lines: Vec<LyricLine>) -> Self {
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// 解析带时间标签的歌词文本
    ///
    /// 没有标签的行会合并到上一行的文本中；第一个标签之前的内容会被丢弃。
    pub fn parse(text: &str) -> Self {
        let mut lines: Vec<LyricLine> = Vec::new();

        for raw_line in text.split(LINE_TERMINATOR) {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            match extract_tag(line) {
                Some((timestamp, rest_offset)) => {
                    lines.push(LyricLine::new(timestamp, line[rest_offset..].trim()));
                }
                None => match lines.last_mut() {
                    Some(last) => {
                        // 续行合并
                        last.text.push_str(LINE_TERMINATOR);
                        last.text.push_str(line);
                    }
                    None => {
                        debug!("丢弃第一个时间标签之前的文本: '{}'", line);
                    }
                },
            }
        }

        Self { lines }
    }

    /// 序列化为标准格式的歌词文本，末行之后不加换行
    pub fn serialize(&self, round_to_hundredths: bool) -> String {
        self.lines
            .iter()
            .map(|line| format!("{}{}", format_tag(line.timestamp, round_to_hundredths), line.text))
            .collect::<Vec<_>>()
            .join(LINE_TERMINATOR)
    }

    /// 从标签存储中的同步文本列表构建歌词
    pub fn from_synced_text(entries: &[SyncedText]) -> Self {
        let lines = entries
            .iter()
            .map(|entry| LyricLine::new(Timestamp::from_millis(entry.time_ms), entry.text.clone()))
            .collect();
        Self { lines }
    }

    /// 转换为标签存储使用的同步文本列表
    pub fn to_synced_text(&self) -> Vec<SyncedText> {
        self.lines
            .iter()
            .map(|line| SyncedText {
                time_ms: line.timestamp.as_millis(),
                text: line.text.clone(),
            })
            .collect()
    }
}
