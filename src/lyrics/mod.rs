// 同步歌词模块
// 时间标签编解码、歌词文本解析与序列化、歌词持久化

mod document;
pub mod store;
pub mod timestamp;

pub use document::{LyricLine, Lyrics, SyncedText, LINE_TERMINATOR};
pub use store::{LrcFileStore, SyncedLyricsStore};
pub use timestamp::{extract_tag, format_tag, parse_tag, TagPattern, Timestamp, TimestampCodec};
