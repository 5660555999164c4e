//! 时间标签、歌词文本和位置换算的性质测试

use std::time::Instant;

use proptest::prelude::*;
use synced_lyrics_rs::audio::AudioPositionMapper;
use synced_lyrics_rs::editor::{EditorSettings, LyricsEditor, TimestampRequest, TimestampResponse};
use synced_lyrics_rs::lyrics::{format_tag, parse_tag, LyricLine, Lyrics, Timestamp};

/// 两位分钟数能表示的范围
const MAX_MS: u64 = 100 * 60 * 1000 - 1;

fn arbitrary_format() -> impl Strategy<Value = AudioPositionMapper> {
    (prop::sample::select(vec![8u16, 12, 16, 20, 24, 32]), 1u16..=8)
        .prop_map(|(bits, channels)| AudioPositionMapper::new(bits, channels).unwrap())
}

fn arbitrary_lyrics() -> impl Strategy<Value = Lyrics> {
    prop::collection::vec((0..MAX_MS, "[A-Za-z]{0,12}"), 0..20).prop_map(|lines| {
        Lyrics::new(
            lines
                .into_iter()
                .map(|(ms, text)| LyricLine::new(Timestamp::from_millis(ms), text))
                .collect(),
        )
    })
}

proptest! {
    /// 不四舍五入时格式化后再解析得到原值
    #[test]
    fn tag_round_trip(ms in 0..MAX_MS) {
        let timestamp = Timestamp::from_millis(ms);
        prop_assert_eq!(parse_tag(&format_tag(timestamp, false)), Some(timestamp));
    }

    /// 四舍五入后再解析得到四舍五入的值
    #[test]
    fn rounded_tag_round_trip(ms in 0..MAX_MS - 10) {
        let timestamp = Timestamp::from_millis(ms);
        prop_assert_eq!(
            parse_tag(&format_tag(timestamp, true)),
            Some(timestamp.round_to_hundredths())
        );
    }

    /// 四舍五入是幂等的，且误差不超过 5 毫秒
    #[test]
    fn rounding_is_idempotent(ms in 0u64..10_000_000) {
        let rounded = Timestamp::from_millis(ms).round_to_hundredths();
        prop_assert_eq!(rounded.round_to_hundredths(), rounded);
        prop_assert_eq!(rounded.as_millis() % 10, 0);
        prop_assert!(rounded.as_millis().abs_diff(ms) <= 5);
    }

    /// 标准格式的歌词序列化后再解析不变
    #[test]
    fn lyrics_round_trip(lyrics in arbitrary_lyrics()) {
        prop_assert_eq!(Lyrics::parse(&lyrics.serialize(false)), lyrics);
    }

    /// 源 -> 输出换算单调，且 0 映射到 0
    #[test]
    fn mapper_is_monotonic(mapper in arbitrary_format(), x in 0i64..1_000_000_000, d in 0i64..1_000_000) {
        let y = x + d;
        prop_assert!(mapper.source_to_dest(x) <= mapper.source_to_dest(y));
        prop_assert_eq!(mapper.source_to_dest(0), 0);
        prop_assert_eq!(mapper.dest_to_source(0), 0);
    }

    /// 往返换算只丢失不足一帧的部分
    #[test]
    fn mapper_loses_less_than_one_frame(mapper in arbitrary_format(), x in 0i64..1_000_000_000) {
        let back = mapper.dest_to_source(mapper.source_to_dest(x));
        prop_assert!(back <= x);
        prop_assert!(x - back < mapper.source_frame_size());
        prop_assert_eq!(back % mapper.source_frame_size(), 0);
    }

    /// 已对齐的输出位置再换算一轮保持不变
    #[test]
    fn mapper_is_stable_once_aligned(mapper in arbitrary_format(), x in -1_000_000_000i64..1_000_000_000) {
        let dest = mapper.source_to_dest(x);
        prop_assert_eq!(mapper.source_to_dest(mapper.dest_to_source(dest)), dest);
        prop_assert_eq!(dest % mapper.dest_frame_size(), 0);
    }

    /// 写入时间戳后当前行的标签就是写入的值，行数不变
    #[test]
    fn inserted_tag_is_read_back(
        lines in prop::collection::vec("[a-z ]{0,10}", 1..8),
        cursor in 0usize..100,
        ms in 0..MAX_MS - 10,
    ) {
        let text = lines.join("\n");
        let mut editor = LyricsEditor::new(EditorSettings::default());
        editor.load_text(&text);
        editor.set_cursor(cursor);

        let now = Instant::now();
        let response = TimestampResponse {
            playback_time: Timestamp::from_millis(ms),
            request: TimestampRequest::sent_at(now),
        };
        let written = editor.insert_playback_timestamp_at(&response, now);

        prop_assert_eq!(written, Timestamp::from_millis(ms).round_to_hundredths());
        prop_assert_eq!(editor.current_line_timestamp(), Some(written));
        prop_assert_eq!(editor.text().split('\n').count(), lines.len());
    }
}
