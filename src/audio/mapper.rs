use crate::error::AudioError;

/// 输出端每个采样的字节数（32 位浮点）
pub const DEST_BYTES_PER_SAMPLE: i64 = 4;

/// 源字节偏移与输出字节偏移之间的换算
///
/// 源端按编码格式的帧大小（位深向上取整到字节 × 声道数）寻址，输出端固定为
/// 每声道 4 字节浮点。两个方向都先向下对齐到整帧再缩放，不足一帧的部分直接丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPositionMapper {
    source_frame_size: i64,
    dest_frame_size: i64,
}

impl AudioPositionMapper {
    /// 根据源格式的位深和声道数创建换算器
    pub fn new(bits_per_sample: u16, channels: u16) -> Result<Self, AudioError> {
        let bytes_per_sample = bits_per_sample.div_ceil(8);
        let source_frame_size = i64::from(bytes_per_sample) * i64::from(channels);
        let dest_frame_size = DEST_BYTES_PER_SAMPLE * i64::from(channels);

        if source_frame_size == 0 || dest_frame_size == 0 {
            return Err(AudioError::InvalidFormat {
                channels,
                bits_per_sample,
            });
        }

        Ok(Self {
            source_frame_size,
            dest_frame_size,
        })
    }

    pub fn source_frame_size(&self) -> i64 {
        self.source_frame_size
    }

    pub fn dest_frame_size(&self) -> i64 {
        self.dest_frame_size
    }

    /// 源字节偏移 -> 输出字节偏移
    pub fn source_to_dest(&self, source_bytes: i64) -> i64 {
        self.dest_frame_size * source_bytes.div_euclid(self.source_frame_size)
    }

    /// 输出字节偏移 -> 源字节偏移
    pub fn dest_to_source(&self, dest_bytes: i64) -> i64 {
        self.source_frame_size * dest_bytes.div_euclid(self.dest_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let mapper = AudioPositionMapper::new(16, 2).unwrap();
        assert_eq!(mapper.source_frame_size(), 4);
        assert_eq!(mapper.dest_frame_size(), 8);

        let mapper = AudioPositionMapper::new(24, 1).unwrap();
        assert_eq!(mapper.source_frame_size(), 3);
        assert_eq!(mapper.dest_frame_size(), 4);
    }

    #[test]
    fn test_conversion_truncates_partial_frames() {
        let mapper = AudioPositionMapper::new(24, 2).unwrap();

        assert_eq!(mapper.source_to_dest(0), 0);
        assert_eq!(mapper.source_to_dest(5), 0);
        assert_eq!(mapper.source_to_dest(6), 8);
        assert_eq!(mapper.source_to_dest(13), 16);

        assert_eq!(mapper.dest_to_source(7), 0);
        assert_eq!(mapper.dest_to_source(8), 6);
        assert_eq!(mapper.dest_to_source(23), 12);
    }

    #[test]
    fn test_aligned_round_trip_is_stable() {
        let mapper = AudioPositionMapper::new(16, 2).unwrap();
        let dest = mapper.source_to_dest(4 * 44_100);
        assert_eq!(dest, 8 * 44_100);
        assert_eq!(mapper.source_to_dest(mapper.dest_to_source(dest)), dest);
    }

    #[test]
    fn test_odd_bit_depth_rounds_up_to_whole_bytes() {
        // 12 位采样按 2 字节存放
        let mapper = AudioPositionMapper::new(12, 2).unwrap();
        assert_eq!(mapper.source_frame_size(), 4);
        assert_eq!(mapper.source_to_dest(4 * 100), 8 * 100);

        let mapper = AudioPositionMapper::new(20, 1).unwrap();
        assert_eq!(mapper.source_frame_size(), 3);

        let mapper = AudioPositionMapper::new(4, 2).unwrap();
        assert_eq!(mapper.source_frame_size(), 2);
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(
            AudioPositionMapper::new(0, 2),
            Err(AudioError::InvalidFormat { .. })
        ));
        assert!(AudioPositionMapper::new(16, 0).is_err());
    }
}
