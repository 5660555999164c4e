use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::audio::AudioStreamReader;
use crate::error::AudioError;

/// 输出设备发出的异步通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// 输出已停止：用户停止、读到结尾或设备出错
    Stopped { error: Option<String> },
}

/// 音频输出设备
///
/// 设备从 [`AudioStreamReader`] 拉取采样，停止时通过事件通道异步通知，
/// 通知可能在任意时刻到达，包括紧跟在用户主动停止之后。
pub trait OutputDevice: Send {
    /// 绑定音频流和事件通道
    fn init(
        &mut self,
        source: Arc<AudioStreamReader>,
        events: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<(), AudioError>;

    fn play(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);
}

/// 采样的最终去处
pub trait SampleSink: Send + Sync {
    fn write(&self, samples: &[f32]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputCommand {
    Play,
    Pause,
    Stop,
}

/// 按实时速度从音频流拉取采样并写入 [`SampleSink`] 的输出设备
///
/// 拉取在一个 tokio 任务中进行，每个周期读取一个周期长度的帧。
/// 必须在 tokio 运行时中调用 [`OutputDevice::init`]。
pub struct PacedOutput {
    sink: Arc<dyn SampleSink>,
    period: Duration,
    control: Option<watch::Sender<OutputCommand>>,
    events: Option<mpsc::UnboundedSender<OutputEvent>>,
    task: Option<JoinHandle<()>>,
}

impl PacedOutput {
    /// 默认拉取周期
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(20);

    pub fn new(sink: Arc<dyn SampleSink>) -> Self {
        Self::with_period(sink, Self::DEFAULT_PERIOD)
    }

    pub fn with_period(sink: Arc<dyn SampleSink>, period: Duration) -> Self {
        Self {
            sink,
            period: period.max(Duration::from_millis(1)),
            control: None,
            events: None,
            task: None,
        }
    }

    fn send(&self, command: OutputCommand) {
        match &self.control {
            Some(control) => {
                control.send_replace(command);
            }
            None => debug!("输出设备尚未初始化，忽略命令 {:?}", command),
        }
    }
}

impl OutputDevice for PacedOutput {
    fn init(
        &mut self,
        source: Arc<AudioStreamReader>,
        events: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<(), AudioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::Output(e.to_string()))?;

        if let Some(task) = self.task.take() {
            task.abort();
        }

        let (control_tx, control_rx) = watch::channel(OutputCommand::Stop);
        let task = runtime.spawn(run_output(
            source,
            Arc::clone(&self.sink),
            self.period,
            control_rx,
            events.clone(),
        ));

        self.control = Some(control_tx);
        self.events = Some(events);
        self.task = Some(task);
        Ok(())
    }

    fn play(&mut self) {
        self.send(OutputCommand::Play);
    }

    fn pause(&mut self) {
        self.send(OutputCommand::Pause);
    }

    fn stop(&mut self) {
        self.send(OutputCommand::Stop);
        if let Some(events) = &self.events {
            let _ = events.send(OutputEvent::Stopped { error: None });
        }
    }
}

impl Drop for PacedOutput {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 输出任务：未播放时只等待命令，播放时按周期拉取
async fn run_output(
    source: Arc<AudioStreamReader>,
    sink: Arc<dyn SampleSink>,
    period: Duration,
    mut control: watch::Receiver<OutputCommand>,
    events: mpsc::UnboundedSender<OutputEvent>,
) {
    let format = source.format();
    let channels = usize::from(format.channels);
    let frames_per_tick =
        (u128::from(format.sample_rate) * period.as_millis() / 1000).max(1) as usize;
    let mut buffer = vec![0.0f32; frames_per_tick * channels];

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("输出任务启动，每周期 {} 帧", frames_per_tick);

    let mut active = false;
    loop {
        if !active {
            if control.changed().await.is_err() {
                break;
            }
            active = *control.borrow_and_update() == OutputCommand::Play;
            if active {
                ticker.reset();
            }
            continue;
        }

        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                active = *control.borrow_and_update() == OutputCommand::Play;
            }
            _ = ticker.tick() => {
                match source.read(&mut buffer) {
                    Ok(0) => {
                        debug!("音频流已读到结尾");
                        active = false;
                        let _ = events.send(OutputEvent::Stopped { error: None });
                    }
                    Ok(written) => sink.write(&buffer[..written]),
                    Err(e) => {
                        warn!("读取音频流失败: {}", e);
                        active = false;
                        let _ = events.send(OutputEvent::Stopped {
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }
    }

    debug!("输出任务退出");
}
