// 歌词编辑器模块
// 文本缓冲区与以行为单位的时间标签编辑

mod buffer;
mod engine;

pub use buffer::EditorBuffer;
pub use engine::{EditorSettings, LyricsEditor, TimestampRequest, TimestampResponse};
