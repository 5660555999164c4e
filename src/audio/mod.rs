// 音频模块
// 负责 WAV、MP3 和 AIFF 的解码、位置换算以及到声卡的输出

mod decoder;
mod device;
mod mapper;
mod output;
mod reader;

pub use device::CpalOutput;
pub use mapper::{AudioPositionMapper, DEST_BYTES_PER_SAMPLE};
pub use output::{OutputDevice, OutputEvent, PacedOutput, SampleSink};
pub use reader::{normalize_volume, AudioStreamReader, MediaSource, StreamFormat};
