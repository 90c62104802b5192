//! 팬아웃 -- 하나의 엔트리 스트림을 여러 목적지로 복제
//!
//! 엔트리는 목적지마다 복제되어 전달됩니다. [`LabelSet`](logweave_core::LabelSet)의
//! `Clone`은 깊은 복사이므로 한 목적지의 레이블 변경이 다른 목적지에 보이지 않습니다.
//!
//! 전송은 목적지 순서대로 하나씩 기다리므로 느린 목적지가 전체에 백프레셔를 겁니다.
//! 입력을 닫은 목적지는 목록에서 제외되고 나머지로 계속 전달합니다.

use logweave_core::metrics::FANOUT_RECEIVERS;
use logweave_core::{BoxFuture, Entry, EntryHandler};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::stage::DEFAULT_CHANNEL_CAPACITY;

/// 팬아웃 빌더
#[derive(Debug, Default)]
pub struct Fanout {
    destinations: Vec<mpsc::Sender<Entry>>,
    capacity: Option<usize>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// 목적지 핸들러를 추가합니다.
    pub fn add(self, destination: &dyn EntryHandler) -> Self {
        self.add_sender(destination.sender())
    }

    /// 목적지 채널을 직접 추가합니다.
    pub fn add_sender(mut self, sender: mpsc::Sender<Entry>) -> Self {
        self.destinations.push(sender);
        self
    }

    /// 팬아웃 입력 채널 용량을 지정합니다.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    /// 목적지 수
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// 워커를 시작하고 핸들러를 반환합니다.
    pub fn start(self) -> FanoutHandler {
        let (tx, rx) = mpsc::channel(self.capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY));
        let close = CancellationToken::new();
        let cancel = CancellationToken::new();
        metrics::gauge!(FANOUT_RECEIVERS).set(self.destinations.len() as f64);

        let worker = tokio::spawn(run_fanout(
            rx,
            self.destinations,
            close.clone(),
            cancel.clone(),
        ));
        FanoutHandler {
            tx,
            close,
            cancel,
            worker: Some(worker),
        }
    }
}

async fn run_fanout(
    mut rx: mpsc::Receiver<Entry>,
    mut destinations: Vec<mpsc::Sender<Entry>>,
    close: CancellationToken,
    cancel: CancellationToken,
) {
    let mut closed = false;
    'fanout: loop {
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
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

        let mut gone = Vec::new();
        for (i, destination) in destinations.iter().enumerate() {
            let send = destination.send(entry.clone());
            tokio::pin!(send);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'fanout,
                    _ = close.cancelled(), if !closed => {
                        rx.close();
                        closed = true;
                    }
                    res = &mut send => {
                        if res.is_err() {
                            gone.push(i);
                        }
                        break;
                    }
                }
            }
        }
        if !gone.is_empty() {
            for i in gone.into_iter().rev() {
                destinations.remove(i);
            }
            warn!(remaining = destinations.len(), "fan-out destination closed, removed");
            metrics::gauge!(FANOUT_RECEIVERS).set(destinations.len() as f64);
        }
    }
    debug!("fan-out worker finished");
}

/// 팬아웃 핸들러
pub struct FanoutHandler {
    tx: mpsc::Sender<Entry>,
    close: CancellationToken,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl EntryHandler for FanoutHandler {
    fn sender(&self) -> mpsc::Sender<Entry> {
        self.tx.clone()
    }

    /// 입력을 닫고 버퍼에 남은 엔트리를 모두 전달한 뒤 완료됩니다.
    fn stop(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(worker) = self.worker.take() else {
                return;
            };
            self.close.cancel();
            if let Err(e) = worker.await {
                error!(error = %e, "fan-out worker panicked");
            }
        })
    }
}

impl Drop for FanoutHandler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::{ChannelHandler, LabelSet};
    use std::time::Duration;

    #[tokio::test]
    async fn every_destination_receives_every_entry() {
        let (a, mut rx_a) = ChannelHandler::new(8);
        let (b, mut rx_b) = ChannelHandler::new(8);
        let mut fanout = Fanout::new().add(&a).add(&b).start();

        for i in 0..3 {
            let labels = LabelSet::from_pairs([("n", i.to_string().as_str())]).unwrap();
            fanout.sender().send(Entry::now(labels, format!("l{i}"))).await.unwrap();
        }
        fanout.stop().await;

        for rx in [&mut rx_a, &mut rx_b] {
            for i in 0..3 {
                assert_eq!(rx.recv().await.unwrap().line, format!("l{i}"));
            }
        }
    }

    #[tokio::test]
    async fn destinations_get_independent_label_sets() {
        let (a, mut rx_a) = ChannelHandler::new(1);
        let (b, mut rx_b) = ChannelHandler::new(1);
        let mut fanout = Fanout::new().add(&a).add(&b).start();

        let labels = LabelSet::from_pairs([("app", "web")]).unwrap();
        fanout.sender().send(Entry::now(labels, "x")).await.unwrap();

        let mut first = rx_a.recv().await.unwrap();
        first.labels.insert("app", "mutated").unwrap();
        let second = rx_b.recv().await.unwrap();
        assert_eq!(second.labels.get("app"), Some("web"));
        fanout.stop().await;
    }

    #[tokio::test]
    async fn closed_destination_is_removed() {
        let (a, rx_a) = ChannelHandler::new(1);
        let (b, mut rx_b) = ChannelHandler::new(4);
        let mut fanout = Fanout::new().add(&a).add(&b).start();
        drop(rx_a);

        for line in ["1", "2"] {
            fanout
                .sender()
                .send(Entry::now(LabelSet::new(), line))
                .await
                .unwrap();
        }
        fanout.stop().await;
        assert_eq!(rx_b.recv().await.unwrap().line, "1");
        assert_eq!(rx_b.recv().await.unwrap().line, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_input_while_destination_is_full() {
        let (a, mut rx_a) = ChannelHandler::new(1);
        let mut fanout = Fanout::new().add(&a).capacity(1).start();
        let tx = fanout.sender();

        // e1은 목적지 버퍼에, e2는 워커의 전송 대기 중
        for line in ["e1", "e2"] {
            tx.send(Entry::now(LabelSet::new(), line)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        let stopper = tokio::spawn(async move { fanout.stop().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tx.send(Entry::now(LabelSet::new(), "late")).await.is_err());

        assert_eq!(rx_a.recv().await.unwrap().line, "e1");
        assert_eq!(rx_a.recv().await.unwrap().line, "e2");
        stopper.await.unwrap();
    }

    #[test]
    fn builder_counts_destinations() {
        let (a, _rx) = ChannelHandler::new(1);
        let fanout = Fanout::new().add(&a).add_sender(a.sender());
        assert_eq!(fanout.len(), 2);
        assert!(Fanout::new().is_empty());
    }
}
