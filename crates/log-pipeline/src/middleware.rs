//! 엔트리 변환 미들웨어 -- 타임아웃이 있는 graceful stop
//!
//! [`EntryMutatorHandler`]는 다음 핸들러를 감싸고, 자체 입력 채널로 들어온 엔트리에
//! 변환 함수를 적용해 전달합니다.
//!
//! # 정지 프로토콜
//!
//! ```text
//! running ──stop()──> draining ──worker 종료──> stopped   (유실 없음)
//!                        │
//!                        └──drain_timeout 경과──> abort ──> stopped   (미전달 엔트리 유실)
//! ```
//!
//! - `stop()`은 입력 채널을 닫습니다. 이미 버퍼에 있는 엔트리는 계속 전달됩니다.
//! - drain이 `drain_timeout` 안에 끝나지 않으면 abort 토큰을 취소합니다.
//!   워커는 진행 중인 전송을 포기하고 종료하며, 남은 엔트리는 버려집니다.
//! - 어느 경우든 워커 태스크는 join됩니다. `stop()`은 멱등입니다.

use std::time::Duration;

use logweave_core::metrics::{MIDDLEWARE_DRAIN_TIMEOUTS_TOTAL, MIDDLEWARE_ENTRIES_LOST_TOTAL};
use logweave_core::{BoxFuture, Entry, EntryHandler};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// drain 타임아웃 기본값
pub const DEFAULT_DRAIN_TIMEOUT: Duration =
    Duration::from_secs(logweave_core::config::DEFAULT_DRAIN_TIMEOUT_SECS);

/// 엔트리 변환 미들웨어
pub struct EntryMutatorHandler {
    tx: mpsc::Sender<Entry>,
    close: CancellationToken,
    abort: CancellationToken,
    worker: Option<JoinHandle<u64>>,
    drain_timeout: Duration,
    lost: u64,
}

impl EntryMutatorHandler {
    /// `next`를 감싸는 미들웨어를 생성합니다. 입력 채널 용량은 1입니다.
    pub fn wrap<F>(next: &dyn EntryHandler, mutate: F, drain_timeout: Duration) -> Self
    where
        F: Fn(Entry) -> Entry + Send + Sync + 'static,
    {
        Self::with_capacity(next, mutate, drain_timeout, 1)
    }

    /// 입력 채널 용량을 지정해 미들웨어를 생성합니다.
    pub fn with_capacity<F>(
        next: &dyn EntryHandler,
        mutate: F,
        drain_timeout: Duration,
        capacity: usize,
    ) -> Self
    where
        F: Fn(Entry) -> Entry + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let close = CancellationToken::new();
        let abort = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            rx,
            next.sender(),
            mutate,
            close.clone(),
            abort.clone(),
        ));

        Self {
            tx,
            close,
            abort,
            worker: Some(worker),
            drain_timeout,
            lost: 0,
        }
    }

    /// 정지 시 타임아웃으로 유실된 엔트리 수
    pub fn lost_entries(&self) -> u64 {
        self.lost
    }

    /// 설정된 drain 타임아웃
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

impl EntryHandler for EntryMutatorHandler {
    fn sender(&self) -> mpsc::Sender<Entry> {
        self.tx.clone()
    }

    fn stop(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(mut worker) = self.worker.take() else {
                return;
            };

            self.close.cancel();

            let joined = tokio::select! {
                res = &mut worker => res,
                _ = tokio::time::sleep(self.drain_timeout) => {
                    warn!(
                        timeout_ms = self.drain_timeout.as_millis() as u64,
                        "drain timeout elapsed, abandoning undelivered entries"
                    );
                    metrics::counter!(MIDDLEWARE_DRAIN_TIMEOUTS_TOTAL).increment(1);
                    self.abort.cancel();
                    worker.await
                }
            };
            self.abort.cancel();

            match joined {
                Ok(lost) => {
                    self.lost = lost;
                    if lost > 0 {
                        warn!(lost, "entries lost during middleware stop");
                        metrics::counter!(MIDDLEWARE_ENTRIES_LOST_TOTAL).increment(lost);
                    }
                }
                Err(e) => error!(error = %e, "middleware worker panicked"),
            }
            debug!("entry mutator stopped");
        })
    }
}

impl Drop for EntryMutatorHandler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close.cancel();
            self.abort.cancel();
        }
    }
}

/// 워커 루프. 반환값은 abort로 유실된 엔트리 수입니다.
async fn run_worker<F>(
    mut rx: mpsc::Receiver<Entry>,
    next: mpsc::Sender<Entry>,
    mutate: F,
    close: CancellationToken,
    abort: CancellationToken,
) -> u64
where
    F: Fn(Entry) -> Entry + Send + Sync + 'static,
{
    let mut closed = false;
    let mut in_flight = false;

    'worker: loop {
        let entry = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            _ = close.cancelled(), if !closed => {
                rx.close();
                closed = true;
                continue;
            }
            entry = rx.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };

        let send = next.send(mutate(entry));
        tokio::pin!(send);

        // 전송이 막혀 있어도 stop()은 즉시 입력을 닫는다
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    in_flight = true;
                    break 'worker;
                }
                _ = close.cancelled(), if !closed => {
                    rx.close();
                    closed = true;
                }
                res = &mut send => {
                    if res.is_err() {
                        warn!("next handler closed its input, stopping middleware worker");
                        break 'worker;
                    }
                    break;
                }
            }
        }
    }

    if !abort.is_cancelled() {
        return 0;
    }

    rx.close();
    let mut lost = u64::from(in_flight);
    while rx.try_recv().is_ok() {
        lost += 1;
    }
    lost
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::{ChannelHandler, LabelSet};

    fn entry(line: &str) -> Entry {
        Entry::now(LabelSet::new(), line)
    }

    #[tokio::test]
    async fn applies_mutation_in_order() {
        let (next, mut rx) = ChannelHandler::new(16);
        let mut handler = EntryMutatorHandler::wrap(
            &next,
            |mut e: Entry| {
                e.line = e.line.to_uppercase();
                e
            },
            DEFAULT_DRAIN_TIMEOUT,
        );

        let tx = handler.sender();
        for line in ["a", "b", "c"] {
            tx.send(entry(line)).await.unwrap();
        }
        handler.stop().await;

        let mut lines = Vec::new();
        while let Ok(e) = rx.try_recv() {
            lines.push(e.line);
        }
        assert_eq!(lines, vec!["A", "B", "C"]);
        assert_eq!(handler.lost_entries(), 0);
    }

    #[tokio::test]
    async fn stop_drains_buffered_entries() {
        let (next, mut rx) = ChannelHandler::new(1);
        let mut handler = EntryMutatorHandler::with_capacity(
            &next,
            |e: Entry| e,
            Duration::from_secs(5),
            8,
        );
        let tx = handler.sender();
        for i in 0..8 {
            tx.send(entry(&i.to_string())).await.unwrap();
        }

        let reader = tokio::spawn(async move {
            let mut count = 0;
            while rx.recv().await.is_some() {
                count += 1;
                if count == 8 {
                    break;
                }
            }
            count
        });

        handler.stop().await;
        assert_eq!(reader.await.unwrap(), 8);
        assert_eq!(handler.lost_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_times_out_when_downstream_is_stuck() {
        // 다음 핸들러의 수신측은 읽지 않으므로 두 번째 전송부터 막힌다
        let (next, mut rx) = ChannelHandler::new(1);
        let timeout = Duration::from_secs(5);
        let mut handler = EntryMutatorHandler::wrap(&next, |e: Entry| e, timeout);

        let tx = handler.sender();
        tx.send(entry("e1")).await.unwrap();
        tx.send(entry("e2")).await.unwrap();
        tx.send(entry("e3")).await.unwrap();

        let started = tokio::time::Instant::now();
        handler.stop().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(100));

        assert_eq!(rx.recv().await.unwrap().line, "e1");
        assert!(rx.try_recv().is_err());
        assert_eq!(handler.lost_entries(), 2);
    }

    #[tokio::test]
    async fn send_after_stop_fails() {
        let (next, _rx) = ChannelHandler::new(1);
        let mut handler = EntryMutatorHandler::wrap(&next, |e: Entry| e, DEFAULT_DRAIN_TIMEOUT);
        let tx = handler.sender();
        handler.stop().await;
        assert!(tx.send(entry("late")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_rejects_sends_while_forward_is_blocked() {
        let (next, _rx) = ChannelHandler::new(1);
        let mut handler = EntryMutatorHandler::wrap(&next, |e: Entry| e, Duration::from_secs(5));

        let tx = handler.sender();
        // e1은 다음 핸들러 버퍼에, e2는 워커의 전송 대기 중
        tx.send(entry("e1")).await.unwrap();
        tx.send(entry("e2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let stopper = tokio::spawn(async move {
            handler.stop().await;
            handler.lost_entries()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(tx.send(entry("late")).await.is_err());
        assert_eq!(stopper.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (next, _rx) = ChannelHandler::new(1);
        let mut handler = EntryMutatorHandler::wrap(&next, |e: Entry| e, DEFAULT_DRAIN_TIMEOUT);
        handler.stop().await;
        handler.stop().await;
        assert_eq!(handler.lost_entries(), 0);
    }
}
