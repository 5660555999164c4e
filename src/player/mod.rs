// 播放器模块
// 播放控制、状态通知与播放位置轮询

mod poller;
mod transport;
mod types;

pub use poller::PositionPoller;
pub use transport::TransportController;
pub use types::{PlaybackSnapshot, PlaybackState, PlayerSettings, StoppedReason};
