use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{AudioStreamReader, OutputDevice, OutputEvent, StreamFormat};
use crate::error::AudioError;

/// 每次从音频流拉取的帧数
const CHUNK_FRAMES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceCommand {
    Play,
    Pause,
    Shutdown,
}

/// 控制线程和设备回调共享的状态
#[derive(Default)]
struct DeviceState {
    playing: AtomicBool,
    /// 重新开始播放，回调需要清除已读到结尾的标记
    resumed: AtomicBool,
}

/// 通过 cpal 输出到系统默认设备
///
/// cpal 的 `Stream` 不能跨线程移动，所以由专门的输出线程持有，
/// 其他线程通过命令通道控制。设备回调直接从 [`AudioStreamReader`] 拉取采样，
/// 采样率或声道数与设备不一致时在回调里转换。
///
/// 设备打开失败、播放出错或读到结尾时都会发出 [`OutputEvent::Stopped`]。
pub struct CpalOutput {
    commands: Option<Sender<DeviceCommand>>,
    events: Option<mpsc::UnboundedSender<OutputEvent>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            commands: None,
            events: None,
            thread: None,
        }
    }

    fn send(&self, command: DeviceCommand) {
        match &self.commands {
            Some(commands) => {
                if commands.send(command).is_err() {
                    debug!("输出线程已退出，忽略命令 {:?}", command);
                }
            }
            None => debug!("输出设备尚未初始化，忽略命令 {:?}", command),
        }
    }

    fn shutdown(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(DeviceCommand::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("输出线程异常退出");
            }
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for CpalOutput {
    fn init(
        &mut self,
        source: Arc<AudioStreamReader>,
        events: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<(), AudioError> {
        self.shutdown();

        let (command_tx, command_rx) = bounded::<DeviceCommand>(32);
        let thread_events = events.clone();
        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let state = Arc::new(DeviceState::default());
                let opened = open_stream(source, thread_events.clone(), Arc::clone(&state));
                run_device(opened, &state, &thread_events, &command_rx);
            })?;

        self.commands = Some(command_tx);
        self.events = Some(events);
        self.thread = Some(thread);
        Ok(())
    }

    fn play(&mut self) {
        self.send(DeviceCommand::Play);
    }

    fn pause(&mut self) {
        self.send(DeviceCommand::Pause);
    }

    fn stop(&mut self) {
        self.send(DeviceCommand::Pause);
        if let Some(events) = &self.events {
            let _ = events.send(OutputEvent::Stopped { error: None });
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 输出线程能控制的流
trait DeviceStream {
    fn start(&self) -> Result<(), String>;
    fn halt(&self) -> Result<(), String>;
}

impl DeviceStream for Stream {
    fn start(&self) -> Result<(), String> {
        self.play().map_err(|e| e.to_string())
    }

    fn halt(&self) -> Result<(), String> {
        self.pause().map_err(|e| e.to_string())
    }
}

/// 输出线程主循环；设备没有打开时每次播放都报告同一个错误
fn run_device<S: DeviceStream>(
    opened: Result<S, AudioError>,
    state: &DeviceState,
    events: &mpsc::UnboundedSender<OutputEvent>,
    commands: &Receiver<DeviceCommand>,
) {
    let (stream, failure) = match opened {
        Ok(stream) => (Some(stream), None),
        Err(e) => {
            warn!("无法打开音频输出设备: {}", e);
            let message = e.to_string();
            let _ = events.send(OutputEvent::Stopped {
                error: Some(message.clone()),
            });
            (None, Some(message))
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            DeviceCommand::Play => match &stream {
                Some(stream) => {
                    state.resumed.store(true, Ordering::Release);
                    state.playing.store(true, Ordering::Release);
                    if let Err(e) = stream.start() {
                        warn!("启动音频输出失败: {}", e);
                        state.playing.store(false, Ordering::Release);
                        let _ = events.send(OutputEvent::Stopped { error: Some(e) });
                    }
                }
                None => {
                    let _ = events.send(OutputEvent::Stopped {
                        error: failure.clone(),
                    });
                }
            },
            DeviceCommand::Pause => {
                state.playing.store(false, Ordering::Release);
                if let Some(stream) = &stream {
                    if let Err(e) = stream.halt() {
                        debug!("暂停音频输出失败: {}", e);
                    }
                }
            }
            DeviceCommand::Shutdown => break,
        }
    }

    debug!("输出线程退出");
}

/// 打开默认设备并建立输出流，流建好后处于静音状态
fn open_stream(
    source: Arc<AudioStreamReader>,
    events: mpsc::UnboundedSender<OutputEvent>,
    state: Arc<DeviceState>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Output("找不到默认输出设备".to_string()))?;

    let config = choose_config(&device, source.format())?;
    info!("音频输出: {} Hz, {} 声道", config.sample_rate, config.channels);

    let mut feeder = DeviceFeeder::new(source, config.channels, config.sample_rate)?;
    let callback_state = Arc::clone(&state);
    let callback_events = events.clone();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if callback_state.resumed.swap(false, Ordering::AcqRel) {
                    feeder.resume();
                }
                if !callback_state.playing.load(Ordering::Acquire) {
                    data.fill(0.0);
                    return;
                }

                match feeder.fill(data) {
                    FeedStatus::Playing => {}
                    FeedStatus::Finished => {
                        callback_state.playing.store(false, Ordering::Release);
                        let _ = callback_events.send(OutputEvent::Stopped { error: None });
                    }
                    FeedStatus::Failed(e) => {
                        callback_state.playing.store(false, Ordering::Release);
                        let _ = callback_events.send(OutputEvent::Stopped { error: Some(e) });
                    }
                }
            },
            move |err| {
                warn!("音频输出出错: {}", err);
                state.playing.store(false, Ordering::Release);
                let _ = events.send(OutputEvent::Stopped {
                    error: Some(err.to_string()),
                });
            },
            None,
        )
        .map_err(|e| AudioError::Output(e.to_string()))?;

    if let Err(e) = stream.pause() {
        debug!("新建的输出流无法暂停: {}", e);
    }
    Ok(stream)
}

/// 优先选择支持源采样率的浮点配置，否则使用设备默认配置
fn choose_config(device: &Device, format: StreamFormat) -> Result<StreamConfig, AudioError> {
    let rate = format.sample_rate;
    let matching = device
        .supported_output_configs()
        .map_err(|e| AudioError::Output(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .min_by_key(|c| c.channels().abs_diff(format.channels));

    match matching {
        Some(supported) => Ok(StreamConfig {
            channels: supported.channels(),
            sample_rate: rate,
            buffer_size: BufferSize::Default,
        }),
        None => {
            let default = device
                .default_output_config()
                .map_err(|e| AudioError::Output(e.to_string()))?;
            debug!("设备不支持 {} Hz 浮点输出，改用默认配置", rate);
            Ok(default.config())
        }
    }
}

#[derive(Debug, PartialEq)]
enum FeedStatus {
    Playing,
    /// 音频流已读完，缓冲也已输出
    Finished,
    Failed(String),
}

/// 从音频流拉取采样并转换为设备的采样率和声道布局
struct DeviceFeeder {
    source: Arc<AudioStreamReader>,
    source_channels: usize,
    device_channels: usize,
    resampler: Option<FastFixedIn<f32>>,
    input: Vec<f32>,
    /// 已转换为设备格式、等待输出的交错采样
    pending: VecDeque<f32>,
    finished: bool,
}

impl DeviceFeeder {
    fn new(
        source: Arc<AudioStreamReader>,
        device_channels: u16,
        device_rate: u32,
    ) -> Result<Self, AudioError> {
        let format = source.format();
        let source_channels = usize::from(format.channels);

        let resampler = if device_rate == format.sample_rate {
            None
        } else {
            debug!("重采样: {} Hz -> {} Hz", format.sample_rate, device_rate);
            let ratio = f64::from(device_rate) / f64::from(format.sample_rate);
            let resampler = FastFixedIn::<f32>::new(
                ratio,
                2.0,
                PolynomialDegree::Linear,
                CHUNK_FRAMES,
                source_channels,
            )
            .map_err(|e| AudioError::Output(e.to_string()))?;
            Some(resampler)
        };

        Ok(Self {
            source,
            source_channels,
            device_channels: usize::from(device_channels.max(1)),
            resampler,
            input: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// 重新播放时允许再次从音频流拉取
    fn resume(&mut self) {
        self.finished = false;
    }

    /// 填满设备缓冲，不足的部分补静音
    fn fill(&mut self, out: &mut [f32]) -> FeedStatus {
        let mut written = 0;
        while written < out.len() {
            if !self.pending.is_empty() {
                let count = (out.len() - written).min(self.pending.len());
                for (dst, src) in out[written..written + count]
                    .iter_mut()
                    .zip(self.pending.drain(..count))
                {
                    *dst = src;
                }
                written += count;
                continue;
            }
            if self.finished {
                break;
            }
            if let Err(e) = self.refill() {
                warn!("读取音频流失败: {}", e);
                out[written..].fill(0.0);
                return FeedStatus::Failed(e.to_string());
            }
        }

        out[written..].fill(0.0);
        if self.finished && self.pending.is_empty() {
            FeedStatus::Finished
        } else {
            FeedStatus::Playing
        }
    }

    /// 读取一块源数据并转换后放入缓冲
    fn refill(&mut self) -> Result<(), AudioError> {
        let frames = self
            .resampler
            .as_ref()
            .map_or(CHUNK_FRAMES, |r| r.input_frames_next());
        self.input.resize(frames * self.source_channels, 0.0);

        let read = self.source.read(&mut self.input)?;
        let read_frames = read / self.source_channels;
        if read_frames < frames {
            self.finished = true;
        }
        if read_frames == 0 {
            return Ok(());
        }

        let Some(resampler) = self.resampler.as_mut() else {
            let input = std::mem::take(&mut self.input);
            for frame in input[..read].chunks_exact(self.source_channels) {
                self.push_frame(frame);
            }
            self.input = input;
            return Ok(());
        };

        let mut planes = vec![Vec::with_capacity(read_frames); self.source_channels];
        for frame in self.input[..read].chunks_exact(self.source_channels) {
            for (plane, &sample) in planes.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }

        let output = if read_frames == frames {
            resampler.process(&planes[..], None)
        } else {
            resampler.process_partial(Some(&planes[..]), None)
        }
        .map_err(|e| AudioError::Output(e.to_string()))?;

        let out_frames = output.first().map_or(0, Vec::len);
        let mut frame = vec![0.0f32; self.source_channels];
        for index in 0..out_frames {
            for (sample, plane) in frame.iter_mut().zip(&output) {
                *sample = plane[index];
            }
            self.push_frame(&frame);
        }
        Ok(())
    }

    /// 按设备声道数放入一帧：单声道复制到各声道，多声道输出到单声道时取平均
    fn push_frame(&mut self, frame: &[f32]) {
        let device_channels = self.device_channels;
        if frame.len() == device_channels {
            self.pending.extend(frame.iter().copied());
        } else if frame.len() == 1 {
            self.pending.extend((0..device_channels).map(|_| frame[0]));
        } else if device_channels == 1 {
            self.pending
                .push_back(frame.iter().sum::<f32>() / frame.len() as f32);
        } else {
            self.pending.extend(
                (0..device_channels).map(|ch| frame.get(ch).copied().unwrap_or(0.0)),
            );
        }
    }
}
