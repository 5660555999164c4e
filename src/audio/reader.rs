use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use serde::Serialize;
use tracing::{debug, info};

use crate::audio::decoder::{self, SourceDecoder, SourceKind};
use crate::audio::AudioPositionMapper;
use crate::error::AudioError;
use crate::lyrics::Timestamp;

/// 可读可寻址的字节流
pub trait MediaSource: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> MediaSource for T {}

/// 将音量截断到 [0, 1]，NaN 视为 0
pub fn normalize_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// 源音频的格式信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// 源采样是否为 IEEE 浮点
    pub float: bool,
}

struct StreamInner {
    decoder: SourceDecoder,
    /// 当前读取位置（源字节，按整帧对齐）
    source_position: i64,
}

/// 把源音频解码为交错的 32 位浮点采样
///
/// WAV 直接读取，MP3 和 AIFF 先解码为 PCM，源帧大小按解码后的格式计算。
/// 对外的位置和长度都以输出字节计，读取和寻址共用同一把锁，
/// 不会在帧内交错。关闭后所有操作都变为空操作。
pub struct AudioStreamReader {
    format: StreamFormat,
    mapper: AudioPositionMapper,
    /// 源数据长度（源字节）
    source_length: i64,
    /// 输出长度（输出字节）
    length: i64,
    volume: AtomicU32,
    /// 最近一次已知的输出位置，锁被占用时返回此值
    last_position: AtomicI64,
    inner: Mutex<Option<StreamInner>>,
}

impl AudioStreamReader {
    /// 打开音频文件
    pub fn open(path: &Path) -> Result<Self, AudioError> {
        if !path.is_file() {
            return Err(AudioError::NotFound(path.to_path_buf()));
        }

        let file_name = path.to_string_lossy();
        SourceKind::from_file_name(&file_name)?;

        let file = File::open(path)?;
        Self::from_stream(&file_name, BufReader::new(file))
    }

    /// 从字节流创建，文件名仅用于判断格式
    pub fn from_stream(
        file_name: &str,
        stream: impl MediaSource + 'static,
    ) -> Result<Self, AudioError> {
        let opened = decoder::open_source(file_name, Box::new(stream))?;
        let format = opened.format;

        if format.sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{}: 采样率为 0",
                file_name
            )));
        }

        let mapper = AudioPositionMapper::new(format.bits_per_sample, format.channels)?;

        let source_length = i64::try_from(opened.frames)
            .unwrap_or(i64::MAX)
            .saturating_mul(mapper.source_frame_size());
        let length = mapper.source_to_dest(source_length);

        info!(
            "已打开音频流: {} ({} Hz, {} 声道, {} 位{})",
            file_name,
            format.sample_rate,
            format.channels,
            format.bits_per_sample,
            if format.float { " 浮点" } else { "" }
        );

        Ok(Self {
            format,
            mapper,
            source_length,
            length,
            volume: AtomicU32::new(1.0f32.to_bits()),
            last_position: AtomicI64::new(0),
            inner: Mutex::new(Some(StreamInner {
                decoder: opened.decoder,
                source_position: 0,
            })),
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn mapper(&self) -> AudioPositionMapper {
        self.mapper
    }

    /// 输出长度（字节）
    pub fn len(&self) -> i64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(normalize_volume(volume).to_bits(), Ordering::Relaxed);
    }

    /// 当前位置（输出字节），已关闭时为 0
    pub fn position(&self) -> i64 {
        match self.lock().as_ref() {
            Some(inner) => self.mapper.source_to_dest(inner.source_position),
            None => 0,
        }
    }

    /// 不阻塞地读取当前位置；锁被读取或寻址占用时返回最近一次已知的位置
    pub fn try_position(&self) -> i64 {
        match self.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                Some(inner) => self.mapper.source_to_dest(inner.source_position),
                None => 0,
            },
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => {
                self.last_position.load(Ordering::Relaxed)
            }
        }
    }

    /// 设置位置（输出字节），先对齐到整帧并截断到流的范围内
    pub fn set_position(&self, dest_bytes: i64) -> Result<(), AudioError> {
        let source = self
            .mapper
            .dest_to_source(dest_bytes.max(0))
            .min(self.source_length);
        let frame = source / self.mapper.source_frame_size();

        let mut guard = self.lock();
        let Some(inner) = guard.as_mut() else {
            debug!("音频流已关闭，忽略寻址");
            return Ok(());
        };

        inner.decoder.seek(frame.unsigned_abs())?;
        inner.source_position = frame * self.mapper.source_frame_size();
        self.last_position.store(
            self.mapper.source_to_dest(inner.source_position),
            Ordering::Relaxed,
        );
        Ok(())
    }

    /// 读取交错的浮点采样，返回写入的采样数；0 表示已到结尾或已关闭
    pub fn read(&self, buffer: &mut [f32]) -> Result<usize, AudioError> {
        let channels = usize::from(self.format.channels);
        let wanted = buffer.len() / channels * channels;
        let volume = self.volume();

        let mut guard = self.lock();
        let Some(inner) = guard.as_mut() else {
            return Ok(0);
        };

        let outcome = inner.decoder.read(&mut buffer[..wanted]);
        let written = outcome.samples;
        for sample in &mut buffer[..written] {
            *sample *= volume;
        }

        let frames = (written / channels) as i64;
        inner.source_position += frames * self.mapper.source_frame_size();
        self.last_position.store(
            self.mapper.source_to_dest(inner.source_position),
            Ordering::Relaxed,
        );

        match outcome.error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// 当前播放时间
    pub fn current_time(&self) -> Timestamp {
        self.dest_to_time(self.position())
    }

    /// 不阻塞地读取当前播放时间
    pub fn try_current_time(&self) -> Timestamp {
        self.dest_to_time(self.try_position())
    }

    pub fn set_current_time(&self, time: Timestamp) -> Result<(), AudioError> {
        self.set_position(self.time_to_dest(time))
    }

    /// 总时长
    pub fn total_time(&self) -> Timestamp {
        self.dest_to_time(self.length)
    }

    /// 输出字节 -> 时间（按整帧向下取整）
    pub fn dest_to_time(&self, dest_bytes: i64) -> Timestamp {
        let frames = dest_bytes.max(0) / self.mapper.dest_frame_size();
        let ms = frames as u128 * 1000 / u128::from(self.format.sample_rate);
        Timestamp::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    /// 时间 -> 输出字节（按整帧向下取整）
    pub fn time_to_dest(&self, time: Timestamp) -> i64 {
        let frames = u128::from(time.as_millis()) * u128::from(self.format.sample_rate) / 1000;
        let bytes = frames * self.mapper.dest_frame_size() as u128;
        i64::try_from(bytes).unwrap_or(i64::MAX)
    }

    /// 释放底层流，重复调用无副作用；返回此次调用是否真正释放了资源
    pub fn close(&self) -> bool {
        let released = self.lock().take().is_some();
        if released {
            self.last_position.store(0, Ordering::Relaxed);
            debug!("音频流已释放");
        }
        released
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<StreamInner>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
