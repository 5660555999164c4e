//! 应用核心的场景测试：打开音频、同步歌词、保存和重新加载

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;
use tokio::sync::mpsc;

use synced_lyrics_rs::app::{App, OutputFactory};
use synced_lyrics_rs::audio::{
    AudioStreamReader, OutputDevice, OutputEvent, PacedOutput, SampleSink,
};
use synced_lyrics_rs::config::Config;
use synced_lyrics_rs::error::AudioError;
use synced_lyrics_rs::lyrics::{LrcFileStore, Timestamp};
use synced_lyrics_rs::player::{PlaybackState, StoppedReason};

/// 不输出声音，停止时发出通知
#[derive(Default)]
struct SilentOutput {
    events: Option<mpsc::UnboundedSender<OutputEvent>>,
}

impl OutputDevice for SilentOutput {
    fn init(
        &mut self,
        _source: Arc<AudioStreamReader>,
        events: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<(), AudioError> {
        self.events = Some(events);
        Ok(())
    }

    fn play(&mut self) {}

    fn pause(&mut self) {}

    fn stop(&mut self) {
        if let Some(events) = &self.events {
            let _ = events.send(OutputEvent::Stopped { error: None });
        }
    }
}

fn silent_factory() -> OutputFactory {
    Box::new(|| -> Box<dyn OutputDevice> { Box::new(SilentOutput::default()) })
}

/// 丢弃采样，只用来按实时速度推进播放
struct DiscardSink;

impl SampleSink for DiscardSink {
    fn write(&self, _samples: &[f32]) {}
}

fn paced_factory() -> OutputFactory {
    Box::new(|| -> Box<dyn OutputDevice> {
        Box::new(PacedOutput::with_period(
            Arc::new(DiscardSink),
            Duration::from_millis(10),
        ))
    })
}

/// 写一个 8000 Hz 单声道静音 WAV 文件
fn write_wav(dir: &Path, name: &str, millis: u32) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for _ in 0..(8 * millis) {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn silent_app(config: Config) -> App {
    let store = Box::new(LrcFileStore::new(&config.store));
    App::with_parts(Arc::new(config), store, silent_factory())
}

#[test]
fn test_sync_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 2000);

    let mut app = silent_app(Config::default());
    app.open_track(&audio).unwrap();
    assert_eq!(app.editor().text(), "");
    assert!(!app.is_dirty());
    assert_eq!(app.transport().duration(), Timestamp::from_millis(2000));
    assert_eq!(app.transport().volume(), 0.5);

    app.select_lyrics_text("Hello\nWorld");
    assert!(app.is_dirty());

    app.transport_mut().seek(Timestamp::from_millis(250)).unwrap();
    assert_eq!(app.sync_current_line(), Timestamp::from_millis(250));

    app.editor_mut().move_to_next_line();
    app.transport_mut().seek(Timestamp::from_millis(1230)).unwrap();
    assert_eq!(app.sync_current_line(), Timestamp::from_millis(1230));
    assert_eq!(app.editor().text(), "[00:00.250]Hello\n[00:01.230]World");

    app.save().unwrap();
    assert!(!app.is_dirty());

    let lrc = dir.path().join("song.lrc");
    assert_eq!(fs::read_to_string(&lrc).unwrap(), "[00:00.250]Hello\n[00:01.230]World");

    // 重新打开时从存储加载
    app.close();
    let mut reopened = silent_app(Config::default());
    reopened.open_track(&audio).unwrap();
    assert_eq!(reopened.editor().text(), "[00:00.250]Hello\n[00:01.230]World");
    assert!(!reopened.is_dirty());
    assert_eq!(reopened.current_track(), Some(audio));
}

#[test]
fn test_jump_and_nudge() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 2000);
    fs::write(dir.path().join("song.lrc"), "[00:00.500]First\n[00:01.500]Second").unwrap();

    let mut app = silent_app(Config::default());
    app.open_track(&audio).unwrap();

    app.editor_mut().move_to_next_line();
    assert_eq!(
        app.jump_to_current_line().unwrap(),
        Some(Timestamp::from_millis(1500))
    );
    assert_eq!(app.transport().current_position(), Timestamp::from_millis(1500));

    assert_eq!(app.nudge_current_line(true), Some(Timestamp::from_millis(1600)));
    app.editor_mut().move_to_previous_line();
    assert_eq!(app.nudge_current_line(false), Some(Timestamp::from_millis(400)));
    assert_eq!(app.editor().text(), "[00:00.400]First\n[00:01.600]Second");
    assert!(app.is_dirty());
}

#[test]
fn test_untagged_line_jump_is_noop() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 1000);

    let mut app = silent_app(Config::default());
    app.open_track(&audio).unwrap();
    app.transport_mut().seek(Timestamp::from_millis(300)).unwrap();

    app.select_lyrics_text("no tag here");
    assert_eq!(app.jump_to_current_line().unwrap(), None);
    assert_eq!(app.nudge_current_line(true), None);
    assert_eq!(app.transport().current_position(), Timestamp::from_millis(300));
}

#[test]
fn test_delay_and_advance_settings() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 2000);

    let mut config = Config::default();
    config.timestamps.delay_ms = 200;
    config.editor.advance_line_after_syncing = true;

    let mut app = silent_app(config);
    app.open_track(&audio).unwrap();
    app.select_lyrics_text("One\nTwo");

    app.transport_mut().seek(Timestamp::from_millis(1000)).unwrap();
    assert_eq!(app.sync_current_line(), Timestamp::from_millis(800));
    assert_eq!(app.sync_current_line(), Timestamp::from_millis(800));
    assert_eq!(app.editor().text(), "[00:00.800]One\n[00:00.800]Two");
}

#[test]
fn test_failed_save_keeps_editor_dirty() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 1000);

    // 歌词目录指向一个普通文件，无法创建
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "").unwrap();
    let mut config = Config::default();
    config.store.lyrics_path = Some(blocker.to_string_lossy().into_owned());

    let mut app = silent_app(config);
    app.open_track(&audio).unwrap();
    app.select_lyrics_text("[00:00.100]Line");

    assert!(app.save().is_err());
    assert!(app.is_dirty());
    assert!(!blocker.join("song.lrc").exists());
}

#[test]
fn test_save_without_track_fails() {
    let mut app = silent_app(Config::default());
    app.select_lyrics_text("[00:00.100]Line");
    assert!(app.save().is_err());
}

#[test]
fn test_unsupported_audio_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("song.flac");
    fs::write(&path, b"not really audio").unwrap();

    let mut app = silent_app(Config::default());
    let err = app.open_track(&path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AudioError>(),
        Some(AudioError::UnsupportedFormat(_))
    ));
    assert!(!app.transport().is_loaded());
}

#[test]
fn test_broken_mp3_reports_decode_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("song.mp3");
    fs::write(&path, b"not really audio").unwrap();

    let mut app = silent_app(Config::default());
    let err = app.open_track(&path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AudioError>(),
        Some(AudioError::Codec(_))
    ));
    assert!(!app.transport().is_loaded());
}

#[test]
fn test_operations_after_close_are_safe() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 1000);

    let mut app = silent_app(Config::default());
    app.open_track(&audio).unwrap();
    app.transport_mut().play();
    app.close();

    app.transport_mut().play();
    app.transport_mut().pause();
    app.transport_mut().seek(Timestamp::from_millis(500)).unwrap();
    assert_eq!(app.transport().state(), PlaybackState::Stopped);
    assert_eq!(app.transport().current_position(), Timestamp::ZERO);
    assert!(app.spawn_position_poller().is_none());
}

#[tokio::test]
async fn test_playback_reaches_end_of_file() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "short.wav", 100);

    let config = Config::default();
    let store = Box::new(LrcFileStore::new(&config.store));
    let mut app = App::with_parts(Arc::new(config), store, paced_factory());
    app.open_track(&audio).unwrap();
    app.transport_mut().play();
    assert_eq!(app.transport().stopped_reason(), StoppedReason::None);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            app.transport_mut().process_output_events();
            if app.transport().state() == PlaybackState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(app.transport().stopped_reason(), StoppedReason::ByEndOfFile);
    assert_eq!(app.transport().current_position(), app.transport().duration());
}

#[tokio::test]
async fn test_position_poller_follows_playback() {
    let dir = TempDir::new().unwrap();
    let audio = write_wav(dir.path(), "song.wav", 1000);

    let mut config = Config::default();
    config.player.position_poll_interval_ms = 10;
    let mut app = silent_app(config);
    app.open_track(&audio).unwrap();
    app.transport_mut().seek(Timestamp::from_millis(700)).unwrap();

    let (poller, mut positions) = app.spawn_position_poller().unwrap();
    app.transport_mut().play();

    tokio::time::timeout(Duration::from_secs(2), positions.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*positions.borrow(), Timestamp::from_millis(700));

    poller.cancel();
}
