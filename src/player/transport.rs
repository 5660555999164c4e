use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::audio::{normalize_volume, AudioStreamReader, OutputDevice, OutputEvent};
use crate::editor::{TimestampRequest, TimestampResponse};
use crate::error::AudioError;
use crate::lyrics::Timestamp;
use crate::player::{PlaybackSnapshot, PlaybackState, PlayerSettings, StoppedReason};

/// 一次打开的音频文件及其输出设备
struct PlaybackSession {
    path: PathBuf,
    stream: Arc<AudioStreamReader>,
    output: Box<dyn OutputDevice>,
    output_events: mpsc::UnboundedReceiver<OutputEvent>,
    state: PlaybackState,
    stopped_reason: StoppedReason,
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.state != PlaybackState::Stopped {
            self.output.stop();
        }
        if self.stream.close() {
            debug!("已释放音频会话: {:?}", self.path);
        }
    }
}

/// 播放控制器
///
/// 持有至多一个已打开的音频文件，负责播放、暂停、停止、寻址和音量，
/// 并把输出设备的异步停止通知合并进自身状态。
pub struct TransportController {
    settings: PlayerSettings,
    volume: f32,
    session: Option<PlaybackSession>,
    state_tx: watch::Sender<PlaybackState>,
}

impl TransportController {
    /// 创建新的播放控制器
    pub fn new(settings: PlayerSettings) -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::Stopped);
        Self {
            volume: normalize_volume(settings.initial_volume),
            settings,
            session: None,
            state_tx,
        }
    }

    pub fn settings(&self) -> PlayerSettings {
        self.settings
    }

    pub fn apply_settings(&mut self, settings: PlayerSettings) {
        self.settings = settings;
    }

    /// 打开音频文件，替换当前已打开的文件
    pub fn open(&mut self, path: &Path, output: Box<dyn OutputDevice>) -> Result<(), AudioError> {
        self.close();
        let stream = AudioStreamReader::open(path)?;
        self.open_stream(path, stream, output)
    }

    /// 使用已创建的音频流打开
    pub fn open_stream(
        &mut self,
        path: impl Into<PathBuf>,
        stream: AudioStreamReader,
        mut output: Box<dyn OutputDevice>,
    ) -> Result<(), AudioError> {
        self.close();

        let path = path.into();
        let stream = Arc::new(stream);
        stream.set_volume(self.volume);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        output.init(Arc::clone(&stream), events_tx)?;

        info!("已打开音频: {:?} (时长 {})", path, stream.total_time());
        self.session = Some(PlaybackSession {
            path,
            stream,
            output,
            output_events: events_rx,
            state: PlaybackState::Stopped,
            stopped_reason: StoppedReason::ByEndOfFile,
        });
        self.publish_state();
        Ok(())
    }

    /// 关闭当前文件，未打开文件时无操作
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            info!("关闭音频: {:?}", session.path);
            drop(session);
            self.publish_state();
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    pub fn state(&self) -> PlaybackState {
        self.session
            .as_ref()
            .map_or(PlaybackState::Stopped, |s| s.state)
    }

    pub fn stopped_reason(&self) -> StoppedReason {
        self.session
            .as_ref()
            .map_or(StoppedReason::None, |s| s.stopped_reason)
    }

    /// 开始或继续播放
    pub fn play(&mut self) {
        self.process_output_events();
        let Some(session) = self.session.as_mut() else {
            debug!("未打开音频，忽略播放");
            return;
        };
        if session.state == PlaybackState::Playing {
            return;
        }

        session.stopped_reason = StoppedReason::None;
        session.output.play();
        session.state = PlaybackState::Playing;
        debug!("开始播放");
        self.publish_state();
    }

    /// 暂停，仅在播放中有效
    pub fn pause(&mut self) {
        self.process_output_events();
        let Some(session) = self.session.as_mut() else {
            debug!("未打开音频，忽略暂停");
            return;
        };
        if session.state != PlaybackState::Playing {
            debug!("当前状态 {:?} 下忽略暂停", session.state);
            return;
        }

        session.output.pause();
        session.state = PlaybackState::Paused;
        debug!("已暂停");
        self.publish_state();
    }

    /// 停止播放并记录原因
    pub fn stop(&mut self, reason: StoppedReason) {
        self.process_output_events();
        let Some(session) = self.session.as_mut() else {
            debug!("未打开音频，忽略停止");
            return;
        };
        if session.state == PlaybackState::Stopped {
            return;
        }

        // 先记录原因，输出设备随后发来的停止通知不会覆盖它
        session.stopped_reason = reason;
        session.output.stop();
        session.state = PlaybackState::Stopped;
        debug!("已停止: {:?}", reason);
        self.publish_state();
    }

    /// 播放中则暂停，否则播放
    pub fn toggle_play_pause(&mut self) {
        self.process_output_events();
        if self.state() == PlaybackState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// 处理输出设备的一条通知
    pub fn handle_output_event(&mut self, event: OutputEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            OutputEvent::Stopped { error } => {
                if let Some(error) = error {
                    warn!("音频输出异常停止: {}", error);
                }
                session.state = PlaybackState::Stopped;
                if session.stopped_reason != StoppedReason::ByUser {
                    session.stopped_reason = StoppedReason::ByEndOfFile;
                }
                debug!("输出已停止，原因: {:?}", session.stopped_reason);
            }
        }
        self.publish_state();
    }

    /// 取出所有待处理的输出通知，返回处理的条数
    pub fn process_output_events(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(session) = self.session.as_mut() {
            while let Ok(event) = session.output_events.try_recv() {
                pending.push(event);
            }
        }

        let count = pending.len();
        for event in pending {
            self.handle_output_event(event);
        }
        count
    }

    /// 跳转到指定时间，超出范围时截断到 [0, 时长]
    pub fn seek(&mut self, target: Timestamp) -> Result<(), AudioError> {
        let Some(session) = self.session.as_ref() else {
            debug!("未打开音频，忽略寻址");
            return Ok(());
        };

        let target = target.min(session.stream.total_time());
        session.stream.set_current_time(target)?;
        debug!("跳转到 {}", target);
        Ok(())
    }

    /// 当前播放位置，未打开文件时为 0
    pub fn current_position(&self) -> Timestamp {
        self.session
            .as_ref()
            .map_or(Timestamp::ZERO, |s| s.stream.current_time())
    }

    /// 总时长，未打开文件时为 0
    pub fn duration(&self) -> Timestamp {
        self.session
            .as_ref()
            .map_or(Timestamp::ZERO, |s| s.stream.total_time())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// 设置音量，截断到 [0, 1]；未打开文件时也会保存，供下次打开使用
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = normalize_volume(volume);
        if let Some(session) = self.session.as_ref() {
            session.stream.set_volume(self.volume);
        }
    }

    /// 以当前播放位置响应编辑器的时间请求
    pub fn resolve_timestamp(&self, request: TimestampRequest) -> TimestampResponse {
        TimestampResponse {
            playback_time: self.current_position(),
            request,
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            path: self.path().map(Path::to_path_buf),
            state: self.state(),
            stopped_reason: self.stopped_reason(),
            position: self.current_position(),
            duration: self.duration(),
            volume: self.volume,
        }
    }

    /// 订阅播放状态变化
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    /// 当前音频流的弱引用，文件关闭后无法升级
    pub fn position_source(&self) -> Option<Weak<AudioStreamReader>> {
        self.session.as_ref().map(|s| Arc::downgrade(&s.stream))
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.state());
    }
}

impl Default for TransportController {
    fn default() -> Self {
        Self::new(PlayerSettings::default())
    }
}
