use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 默认的时间戳解析器，按精度从高到低排列
static DEFAULT_CODEC: LazyLock<TimestampCodec> = LazyLock::new(TimestampCodec::standard);

/// 歌词时间戳，内部以整数毫秒表示
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// 将毫秒四舍五入到最接近的 10 毫秒（百分之一秒）
    pub fn round_to_hundredths(self) -> Self {
        Self(self.0.saturating_add(5) / 10 * 10)
    }

    /// 按有符号的毫秒偏移移动时间戳，结果不会小于 0
    pub fn offset_by(self, delta_ms: i64) -> Self {
        if delta_ms >= 0 {
            Self(self.0.saturating_add(delta_ms as u64))
        } else {
            Self(self.0.saturating_sub(delta_ms.unsigned_abs()))
        }
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(ms))
    }
}

impl From<Duration> for Timestamp {
    fn from(duration: Duration) -> Self {
        Self(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

impl From<Timestamp> for Duration {
    fn from(timestamp: Timestamp) -> Self {
        Duration::from_millis(timestamp.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.0 / 60_000;
        let seconds = self.0 / 1000 % 60;
        let millis = self.0 % 1000;
        write!(f, "{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}

/// 一种可接受的时间标签文本格式
#[derive(Debug, Clone)]
pub struct TagPattern {
    name: &'static str,
    regex: Regex,
    /// 小数部分的位数（2 = 百分之一秒，3 = 毫秒）
    fraction_digits: u32,
}

impl TagPattern {
    /// 创建标签格式，`pattern` 必须包含分、秒、小数三个捕获组
    pub fn new(
        name: &'static str,
        pattern: &str,
        fraction_digits: u32,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
            fraction_digits,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn parse(&self, text: &str) -> Option<Timestamp> {
        let caps = self.regex.captures(text)?;
        let minutes = caps.get(1)?.as_str().parse::<u64>().ok()?;
        let seconds = caps.get(2)?.as_str().parse::<u64>().ok()?;
        if seconds >= 60 {
            return None;
        }

        let fraction = caps.get(3)?.as_str().parse::<u64>().ok()?;
        // 小数部分补齐到毫秒
        let millis = match self.fraction_digits {
            2 => fraction * 10,
            3 => fraction,
            _ => return None,
        };

        minutes
            .checked_mul(60_000)?
            .checked_add(seconds * 1000 + millis)
            .map(Timestamp::from_millis)
    }
}

/// 时间标签编解码器
///
/// 读取时按顺序尝试每种格式，写入时始终输出 `[MM:SS.FFF]`。
/// 只接受 ASCII 数字和 `.` 作为小数分隔符，与系统区域设置无关。
#[derive(Debug, Clone)]
pub struct TimestampCodec {
    patterns: Vec<TagPattern>,
}

impl Default for TimestampCodec {
    fn default() -> Self {
        DEFAULT_CODEC.clone()
    }
}

impl TimestampCodec {
    /// 使用自定义的格式列表创建编解码器
    pub fn new(patterns: Vec<TagPattern>) -> Self {
        Self { patterns }
    }

    /// 内置的四种格式：两位/不定宽分钟 × 三位/两位小数
    fn standard() -> Self {
        let builtin = [
            ("[mm:ss.fff]", r"^\[([0-9]{2}):([0-9]{2})\.([0-9]{3})\]$", 3),
            ("[mm:ss.ff]", r"^\[([0-9]{2}):([0-9]{2})\.([0-9]{2})\]$", 2),
            ("[m:ss.fff]", r"^\[([0-9]+):([0-9]{2})\.([0-9]{3})\]$", 3),
            ("[m:ss.ff]", r"^\[([0-9]+):([0-9]{2})\.([0-9]{2})\]$", 2),
        ];

        let patterns = builtin
            .into_iter()
            .map(|(name, pattern, digits)| {
                TagPattern::new(name, pattern, digits).expect("内置时间戳格式无效")
            })
            .collect();

        Self { patterns }
    }

    pub fn patterns(&self) -> &[TagPattern] {
        &self.patterns
    }

    /// 格式化为标准的 `[MM:SS.FFF]` 标签
    pub fn format(&self, timestamp: Timestamp, round_to_hundredths: bool) -> String {
        let timestamp = if round_to_hundredths {
            timestamp.round_to_hundredths()
        } else {
            timestamp
        };
        format!("[{}]", timestamp)
    }

    /// 解析完整的标签文本，返回第一个匹配成功的格式的结果
    pub fn parse(&self, tag_text: &str) -> Option<Timestamp> {
        self.patterns
            .iter()
            .find_map(|pattern| pattern.parse(tag_text))
    }

    /// 从一行文本中提取开头的时间标签
    ///
    /// 以行内第一个 `]` 为标签结束位置，返回时间戳和紧随 `]` 之后的字节偏移。
    pub fn extract_tag(&self, line: &str) -> Option<(Timestamp, usize)> {
        let close = line.find(']')?;
        let rest_offset = close + 1;
        let timestamp = self.parse(line[..rest_offset].trim_start())?;
        Some((timestamp, rest_offset))
    }
}

/// 使用默认编解码器格式化时间标签
pub fn format_tag(timestamp: Timestamp, round_to_hundredths: bool) -> String {
    DEFAULT_CODEC.format(timestamp, round_to_hundredths)
}

/// 使用默认编解码器解析时间标签
pub fn parse_tag(tag_text: &str) -> Option<Timestamp> {
    DEFAULT_CODEC.parse(tag_text)
}

/// 使用默认编解码器从行首提取时间标签
pub fn extract_tag(line: &str) -> Option<(Timestamp, usize)> {
    DEFAULT_CODEC.extract_tag(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tag() {
        assert_eq!(format_tag(Timestamp::from_millis(0), false), "[00:00.000]");
        assert_eq!(format_tag(Timestamp::from_millis(1200), false), "[00:01.200]");
        assert_eq!(format_tag(Timestamp::from_millis(83_456), false), "[01:23.456]");
        // 超过 99 分钟时分钟字段自然变宽
        assert_eq!(
            format_tag(Timestamp::from_millis(100 * 60_000 + 5), false),
            "[100:00.005]"
        );
    }

    #[test]
    fn test_format_tag_rounded() {
        assert_eq!(format_tag(Timestamp::from_millis(1234), true), "[00:01.230]");
        assert_eq!(format_tag(Timestamp::from_millis(1235), true), "[00:01.240]");
        assert_eq!(format_tag(Timestamp::from_millis(59_995), true), "[01:00.000]");
    }

    #[test]
    fn test_parse_tag_variants() {
        assert_eq!(parse_tag("[00:01.200]"), Some(Timestamp::from_millis(1200)));
        assert_eq!(parse_tag("[00:01.20]"), Some(Timestamp::from_millis(1200)));
        assert_eq!(parse_tag("[1:02.345]"), Some(Timestamp::from_millis(62_345)));
        assert_eq!(parse_tag("[1:02.34]"), Some(Timestamp::from_millis(62_340)));
        assert_eq!(parse_tag("[123:00.000]"), Some(Timestamp::from_millis(7_380_000)));
    }

    #[test]
    fn test_parse_tag_rejects_malformed() {
        assert_eq!(parse_tag("[00:01.200"), None);
        assert_eq!(parse_tag("00:01.200]"), None);
        assert_eq!(parse_tag("[00:1.200]"), None);
        assert_eq!(parse_tag("[00:01.2]"), None);
        assert_eq!(parse_tag("[00:01,200]"), None);
        assert_eq!(parse_tag("[ab:01.200]"), None);
        assert_eq!(parse_tag("[00:61.000]"), None);
        assert_eq!(parse_tag("[ar:Someone]"), None);
        // 非 ASCII 数字
        assert_eq!(parse_tag("[００:01.200]"), None);
    }

    #[test]
    fn test_extract_tag() {
        let (timestamp, rest) = extract_tag("[00:03.450]World").unwrap();
        assert_eq!(timestamp.as_millis(), 3450);
        assert_eq!(rest, 11);

        // 行首空白会被忽略，偏移仍然相对于原始行
        let (timestamp, rest) = extract_tag("  [00:03.45] World").unwrap();
        assert_eq!(timestamp.as_millis(), 3450);
        assert_eq!(&"  [00:03.45] World"[rest..], " World");
    }

    #[test]
    fn test_extract_tag_first_bracket_wins() {
        assert_eq!(extract_tag("plain text"), None);
        assert_eq!(extract_tag("a] [00:01.000]b"), None);
        assert_eq!(extract_tag("[00:01.000"), None);
    }

    #[test]
    fn test_timestamp_offset() {
        let timestamp = Timestamp::from_millis(1000);
        assert_eq!(timestamp.offset_by(250).as_millis(), 1250);
        assert_eq!(timestamp.offset_by(-250).as_millis(), 750);
        assert_eq!(timestamp.offset_by(-5000), Timestamp::ZERO);
        assert_eq!(
            timestamp.saturating_sub(Duration::from_millis(1500)),
            Timestamp::ZERO
        );
    }

    #[test]
    fn test_custom_pattern_order() {
        let codec = TimestampCodec::new(vec![TagPattern::new(
            "[m:ss.ff]",
            r"^\[([0-9]+):([0-9]{2})\.([0-9]{2})\]$",
            2,
        )
        .unwrap()]);
        assert_eq!(codec.patterns().len(), 1);
        assert_eq!(codec.parse("[0:01.50]"), Some(Timestamp::from_millis(1500)));
        assert_eq!(codec.parse("[00:01.500]"), None);
    }
}
