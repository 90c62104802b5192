//! 핸들러 trait -- 엔트리를 받아들이는 채널 기반 싱크
//!
//! [`EntryHandler`]는 쓰기 전용 채널과 `stop()` 생명주기 연산을 노출합니다.
//! 미들웨어, 파이프라인, 팬아웃이 모두 이 trait을 구현하므로 서로 감쌀 수 있습니다.
//!
//! # 생산자 규약
//! - `sender()`로 얻은 채널에 엔트리를 보냅니다. 백프레셔가 걸리면 대기합니다.
//! - `stop()`은 최대 한 번 호출하고, 완료될 때까지 기다립니다.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::debug;

use crate::entry::Entry;

/// dyn-compatible async 메서드를 위한 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 엔트리 핸들러
///
/// # 구현 예시
/// ```ignore
/// struct Sink { tx: mpsc::Sender<Entry> }
///
/// impl EntryHandler for Sink {
///     fn sender(&self) -> mpsc::Sender<Entry> {
///         self.tx.clone()
///     }
///
///     fn stop(&mut self) -> BoxFuture<'_, ()> {
///         Box::pin(async {})
///     }
/// }
/// ```
pub trait EntryHandler: Send + Sync {
    /// 입력 채널의 송신측을 반환합니다.
    fn sender(&self) -> mpsc::Sender<Entry>;

    /// 핸들러를 정지합니다.
    ///
    /// 반환된 future는 내부 작업이 모두 종료된 뒤 완료됩니다.
    /// 두 번째 호출부터는 아무 동작도 하지 않습니다.
    fn stop(&mut self) -> BoxFuture<'_, ()>;
}

/// 단순 채널 핸들러
///
/// 생성 시 함께 반환되는 수신측으로 엔트리를 그대로 전달합니다.
/// 싱크 어댑터와 테스트에서 파이프라인의 최종 목적지로 사용합니다.
pub struct ChannelHandler {
    tx: mpsc::Sender<Entry>,
    stopped: bool,
}

impl ChannelHandler {
    /// 주어진 용량의 채널 핸들러와 수신측을 생성합니다.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Entry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    /// 기존 송신측으로 핸들러를 생성합니다.
    pub fn from_sender(tx: mpsc::Sender<Entry>) -> Self {
        Self { tx, stopped: false }
    }

    /// 정지 여부
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl EntryHandler for ChannelHandler {
    fn sender(&self) -> mpsc::Sender<Entry> {
        self.tx.clone()
    }

    fn stop(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.stopped {
                self.stopped = true;
                debug!("channel handler stopped");
            }
        })
    }
}
