use std::io::{self, Read, Seek, SeekFrom};

use hound::WavReader;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::audio::{MediaSource, StreamFormat};
use crate::error::AudioError;

/// 压缩格式解码后按 16 位 PCM 计算源帧大小
const DECODED_BITS_PER_SAMPLE: u16 = 16;

/// 可以流式读取的音频容器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceKind {
    Wav,
    Mp3,
    Aiff,
}

impl SourceKind {
    /// 按扩展名判断格式，不区分大小写
    pub(crate) fn from_file_name(file_name: &str) -> Result<Self, AudioError> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".wav") {
            Ok(Self::Wav)
        } else if lower.ends_with(".mp3") {
            Ok(Self::Mp3)
        } else if lower.ends_with(".aiff") || lower.ends_with(".aif") {
            Ok(Self::Aiff)
        } else {
            Err(AudioError::UnsupportedFormat(file_name.to_string()))
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Aiff => "aiff",
        }
    }
}

/// 一次读取的结果：出错前已写入的采样仍然有效
pub(crate) struct ReadOutcome {
    pub samples: usize,
    pub error: Option<AudioError>,
}

impl ReadOutcome {
    fn complete(samples: usize) -> Self {
        Self {
            samples,
            error: None,
        }
    }
}

/// 打开后的音频源
pub(crate) struct OpenedSource {
    pub format: StreamFormat,
    /// 总帧数
    pub frames: u64,
    pub decoder: SourceDecoder,
}

/// 把源数据解码为交错的 [-1, 1] 浮点采样
pub(crate) enum SourceDecoder {
    Wav(WavDecoder),
    Compressed(CompressedDecoder),
}

impl SourceDecoder {
    /// `buffer` 的长度必须是声道数的整数倍
    pub(crate) fn read(&mut self, buffer: &mut [f32]) -> ReadOutcome {
        match self {
            Self::Wav(decoder) => decoder.read(buffer),
            Self::Compressed(decoder) => decoder.read(buffer),
        }
    }

    /// 定位到指定帧
    pub(crate) fn seek(&mut self, frame: u64) -> Result<(), AudioError> {
        match self {
            Self::Wav(decoder) => decoder.seek(frame),
            Self::Compressed(decoder) => decoder.seek(frame),
        }
    }
}

/// 按扩展名选择解码器并读取格式信息
pub(crate) fn open_source(
    file_name: &str,
    stream: Box<dyn MediaSource>,
) -> Result<OpenedSource, AudioError> {
    match SourceKind::from_file_name(file_name)? {
        SourceKind::Wav => open_wav(stream),
        kind => open_compressed(file_name, kind, stream),
    }
}

pub(crate) struct WavDecoder {
    reader: WavReader<Box<dyn MediaSource>>,
    float: bool,
    scale: f32,
}

fn open_wav(stream: Box<dyn MediaSource>) -> Result<OpenedSource, AudioError> {
    let reader = WavReader::new(stream)?;
    let spec = reader.spec();
    let float = spec.sample_format == hound::SampleFormat::Float;

    let format = StreamFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        float,
    };
    let scale = if float || spec.bits_per_sample == 0 {
        1.0
    } else {
        1.0 / (1i64 << (spec.bits_per_sample.min(32) - 1)) as f32
    };

    Ok(OpenedSource {
        format,
        frames: u64::from(reader.duration()),
        decoder: SourceDecoder::Wav(WavDecoder {
            reader,
            float,
            scale,
        }),
    })
}

impl WavDecoder {
    fn read(&mut self, buffer: &mut [f32]) -> ReadOutcome {
        let mut written = 0;

        if self.float {
            for sample in self.reader.samples::<f32>().take(buffer.len()) {
                match sample {
                    Ok(value) => {
                        buffer[written] = value;
                        written += 1;
                    }
                    Err(e) => {
                        return ReadOutcome {
                            samples: written,
                            error: Some(e.into()),
                        }
                    }
                }
            }
        } else {
            for sample in self.reader.samples::<i32>().take(buffer.len()) {
                match sample {
                    Ok(value) => {
                        buffer[written] = value as f32 * self.scale;
                        written += 1;
                    }
                    Err(e) => {
                        return ReadOutcome {
                            samples: written,
                            error: Some(e.into()),
                        }
                    }
                }
            }
        }

        ReadOutcome::complete(written)
    }

    fn seek(&mut self, frame: u64) -> Result<(), AudioError> {
        self.reader.seek(u32::try_from(frame).unwrap_or(u32::MAX))?;
        Ok(())
    }
}

/// 把 [`MediaSource`] 交给 symphonia
struct SymphoniaSource {
    inner: Box<dyn MediaSource>,
    len: Option<u64>,
}

impl SymphoniaSource {
    fn new(mut inner: Box<dyn MediaSource>) -> io::Result<Self> {
        let start = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            len: Some(end),
        })
    }
}

impl Read for SymphoniaSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for SymphoniaSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl symphonia::core::io::MediaSource for SymphoniaSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

/// 经 symphonia 解码的 MP3 和 AIFF
pub(crate) struct CompressedDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    total_frames: u64,
    /// 当前帧位置
    position: u64,
    /// 已解码但还没有交出去的交错采样
    pending: Vec<f32>,
    pending_offset: usize,
    /// 寻址落在数据包中间时需要丢弃的帧数
    skip_frames: u64,
}

fn open_compressed(
    file_name: &str,
    kind: SourceKind,
    stream: Box<dyn MediaSource>,
) -> Result<OpenedSource, AudioError> {
    let source = SymphoniaSource::new(stream)?;
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(kind.extension());

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::UnsupportedFormat(format!("{}: 没有音频轨道", file_name)))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let channels = params.channels.map(|c| c.count()).unwrap_or(0);
    let bits_per_sample = params
        .bits_per_sample
        .and_then(|bits| u16::try_from(bits).ok())
        .unwrap_or(DECODED_BITS_PER_SAMPLE);
    let stream_format = StreamFormat {
        sample_rate: params.sample_rate.unwrap_or(0),
        channels: u16::try_from(channels).map_err(|_| AudioError::InvalidFormat {
            channels: u16::MAX,
            bits_per_sample,
        })?,
        bits_per_sample,
        float: matches!(
            params.sample_format,
            Some(symphonia::core::sample::SampleFormat::F32)
                | Some(symphonia::core::sample::SampleFormat::F64)
        ),
    };

    let decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

    let total_frames = match params.n_frames {
        Some(frames) => frames,
        None => count_frames(format.as_mut(), track_id)?,
    };
    debug!("{}: {} 帧, 轨道 {}", file_name, total_frames, track_id);

    Ok(OpenedSource {
        format: stream_format,
        frames: total_frames,
        decoder: SourceDecoder::Compressed(CompressedDecoder {
            format,
            decoder,
            track_id,
            channels,
            total_frames,
            position: 0,
            pending: Vec::new(),
            pending_offset: 0,
            skip_frames: 0,
        }),
    })
}

/// 容器没有给出长度时逐个数据包累加，结束后回到开头
fn count_frames(format: &mut dyn FormatReader, track_id: u32) -> Result<u64, AudioError> {
    let mut frames = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => frames += packet.dur,
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    format.seek(
        SeekMode::Accurate,
        SeekTo::TimeStamp { ts: 0, track_id },
    )?;
    Ok(frames)
}

impl CompressedDecoder {
    fn read(&mut self, buffer: &mut [f32]) -> ReadOutcome {
        let remaining = (self.total_frames - self.position).saturating_mul(self.channels as u64);
        let wanted = buffer
            .len()
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut written = 0;
        let mut error = None;
        while written < wanted {
            if self.pending_offset == self.pending.len() {
                match self.decode_next() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
            }

            let count = (wanted - written).min(self.pending.len() - self.pending_offset);
            buffer[written..written + count]
                .copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + count]);
            written += count;
            self.pending_offset += count;
        }

        self.position += (written / self.channels) as u64;
        ReadOutcome {
            samples: written,
            error,
        }
    }

    /// 解码下一个数据包，到结尾时返回 false
    fn decode_next(&mut self) -> Result<bool, AudioError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("跳过无法解码的数据包: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            if spec.channels.count() != self.channels {
                warn!(
                    "数据包声道数 {} 与音轨 {} 不一致，已跳过",
                    spec.channels.count(),
                    self.channels
                );
                continue;
            }

            let frames = decoded.frames();
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            let skip = self.skip_frames.min(frames as u64) as usize;
            self.skip_frames -= skip as u64;

            self.pending.clear();
            self.pending
                .extend_from_slice(&samples.samples()[skip * self.channels..]);
            self.pending_offset = 0;

            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }

    fn seek(&mut self, frame: u64) -> Result<(), AudioError> {
        self.pending.clear();
        self.pending_offset = 0;
        self.skip_frames = 0;

        if frame >= self.total_frames {
            self.position = self.total_frames;
            return Ok(());
        }

        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: frame,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.position = frame;
        Ok(())
    }
}
