use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::audio::AudioStreamReader;
use crate::lyrics::Timestamp;
use crate::player::PlaybackState;

/// 播放位置轮询器
///
/// 只在播放中按固定间隔读取位置；暂停或停止时挂起等待状态变化，不产生唤醒。
/// 音频流被释放或所有位置订阅者都已断开时任务自行退出。
pub struct PositionPoller {
    task: JoinHandle<()>,
}

impl PositionPoller {
    /// 启动轮询任务，返回位置订阅端
    pub fn spawn(
        source: Weak<AudioStreamReader>,
        state: watch::Receiver<PlaybackState>,
        interval: Duration,
    ) -> (Self, watch::Receiver<Timestamp>) {
        let initial = source
            .upgrade()
            .map_or(Timestamp::ZERO, |s| s.try_current_time());
        let (position_tx, position_rx) = watch::channel(initial);

        let task = tokio::spawn(poll_position(source, state, interval, position_tx));
        (Self { task }, position_rx)
    }

    /// 取消轮询
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PositionPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_position(
    source: Weak<AudioStreamReader>,
    mut state: watch::Receiver<PlaybackState>,
    interval: Duration,
    position_tx: watch::Sender<Timestamp>,
) {
    debug!("位置轮询启动，间隔 {:?}", interval);

    'outer: loop {
        if source.strong_count() == 0 {
            break;
        }

        if *state.borrow_and_update() != PlaybackState::Playing {
            if state.changed().await.is_err() {
                break;
            }
            continue;
        }

        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                    if *state.borrow_and_update() != PlaybackState::Playing {
                        continue 'outer;
                    }
                }
                _ = ticker.tick() => {
                    let Some(stream) = source.upgrade() else {
                        break 'outer;
                    };
                    // 读取或寻址占用锁时返回最近一次已知的位置
                    let position = stream.try_current_time();
                    drop(stream);

                    if position_tx.is_closed() {
                        break 'outer;
                    }
                    position_tx.send_replace(position);
                }
            }
        }
    }

    debug!("位置轮询退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::transport::tests::{one_second_stream, RecordingOutput};
    use crate::player::TransportController;

    const INTERVAL: Duration = Duration::from_millis(10);

    fn playing_transport() -> TransportController {
        let mut transport = TransportController::default();
        transport
            .open_stream("test.wav", one_second_stream(), Box::new(RecordingOutput::default()))
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn test_reports_position_while_playing() {
        let mut transport = playing_transport();
        transport.seek(Timestamp::from_millis(250)).unwrap();

        let (_poller, mut positions) = PositionPoller::spawn(
            transport.position_source().unwrap(),
            transport.subscribe_state(),
            INTERVAL,
        );
        transport.play();

        time::timeout(Duration::from_secs(2), positions.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*positions.borrow_and_update(), Timestamp::from_millis(250));
    }

    #[tokio::test]
    async fn test_idle_while_paused() {
        let mut transport = playing_transport();
        let (_poller, mut positions) = PositionPoller::spawn(
            transport.position_source().unwrap(),
            transport.subscribe_state(),
            INTERVAL,
        );

        transport.play();
        time::sleep(INTERVAL * 3).await;
        transport.pause();
        time::sleep(INTERVAL * 3).await;
        positions.borrow_and_update();

        let idle = time::timeout(INTERVAL * 6, positions.changed()).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn test_exits_when_stream_closed() {
        let mut transport = playing_transport();
        let (poller, _positions) = PositionPoller::spawn(
            transport.position_source().unwrap(),
            transport.subscribe_state(),
            INTERVAL,
        );

        transport.close();
        time::timeout(Duration::from_secs(2), async {
            while !poller.is_finished() {
                time::sleep(INTERVAL).await;
            }
        })
        .await
        .unwrap();
    }
}
