//! 파이프라인 -- 스테이지의 순서 있는 합성
//!
//! [`Pipeline`]은 레이블 시딩 후 스테이지들을 선언 순서대로 연결합니다.
//! 스스로 [`Stage`]를 구현하므로 다른 파이프라인 안에 중첩할 수 있고,
//! [`Pipeline::wrap`]으로 다음 핸들러 앞에 붙는 [`PipelineHandler`]가 됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! sender() -> 입력 태스크 (Entry -> ProcessingEntry)
//!          -> 시딩 -> stage1 -> ... -> stageN
//!          -> 출력 태스크 (속도 제한 -> ProcessingEntry -> Entry) -> next.sender()
//! ```

use std::sync::Arc;

use logweave_core::metrics::{PIPELINE_ENTRIES_RECEIVED_TOTAL, PIPELINE_ENTRIES_SENT_TOTAL};
use logweave_core::stage_config::StageConfig;
use logweave_core::{BoxFuture, Entry, EntryHandler};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::counter::DropCounter;
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;
use crate::ratelimit::EntryRateLimiter;
use crate::stage::{
    DEFAULT_CHANNEL_CAPACITY, MapStage, Processor, RunContext, Stage, StageContext, build_stage,
};

/// 현재 레이블을 추출 맵에 복사하는 암묵적 첫 단계
struct SeedLabels;

impl Processor for SeedLabels {
    fn name(&self) -> &'static str {
        "seed_labels"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        entry.seed_labels();
    }
}

/// 스테이지 파이프라인
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    ctx: StageContext,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// 설정 블록들로 파이프라인을 생성합니다.
    ///
    /// 하나라도 실패하면 첫 번째 설정 오류를 반환하며, 일부만 만들어진 파이프라인은 없습니다.
    pub fn new(configs: &[StageConfig], ctx: &StageContext) -> Result<Self, LogPipelineError> {
        let stages = configs
            .iter()
            .map(|config| build_stage(config, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(stages = stages.len(), "pipeline built");
        Ok(Self::from_stages(stages, ctx.clone()))
    }

    /// 이미 생성된 스테이지들로 파이프라인을 구성합니다.
    pub fn from_stages(stages: Vec<Box<dyn Stage>>, ctx: StageContext) -> Self {
        Self { stages, ctx }
    }

    /// 스테이지 종류 이름 목록 (선언 순서)
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 스테이지 수
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 파이프라인이 공유하는 드롭 카운터
    pub fn drop_counter(&self) -> &DropCounter {
        &self.ctx.drop_counter
    }

    /// `next` 앞에 파이프라인을 붙인 핸들러를 생성합니다.
    ///
    /// `limiter`가 주어지면 최종 엔트리가 `next`로 가기 전에 속도 제한을 거칩니다.
    pub fn wrap(
        self,
        next: &dyn EntryHandler,
        limiter: Option<Arc<EntryRateLimiter>>,
    ) -> PipelineHandler {
        self.wrap_with_capacity(next, limiter, DEFAULT_CHANNEL_CAPACITY)
    }

    /// 단계 사이 채널 용량을 지정해 핸들러를 생성합니다.
    pub fn wrap_with_capacity(
        self,
        next: &dyn EntryHandler,
        limiter: Option<Arc<EntryRateLimiter>>,
        capacity: usize,
    ) -> PipelineHandler {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let close = CancellationToken::new();
        let cancel = CancellationToken::new();
        let counter = self.ctx.drop_counter.clone();

        let (pipeline_tx, pipeline_rx) = mpsc::channel(capacity);
        let run_ctx = RunContext::new(cancel.clone()).with_capacity(capacity);
        let pipeline_out = Box::new(self).run(pipeline_rx, run_ctx);

        let input = tokio::spawn(run_input(rx, pipeline_tx, close.clone(), cancel.clone()));
        let output = tokio::spawn(run_output(
            pipeline_out,
            next.sender(),
            limiter,
            counter.clone(),
            cancel.clone(),
        ));

        PipelineHandler {
            tx,
            close,
            cancel,
            tasks: Some((input, output)),
            counter,
        }
    }
}

impl Stage for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn run(
        self: Box<Self>,
        input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry> {
        let seeded = Box::new(MapStage(SeedLabels)).run(input, ctx.clone());
        self.stages
            .into_iter()
            .fold(seeded, |rx, stage| stage.run(rx, ctx.clone()))
    }
}

/// 입력 태스크: 핸들러 입력을 파이프라인 입력으로 변환합니다.
async fn run_input(
    mut rx: mpsc::Receiver<Entry>,
    pipeline_tx: mpsc::Sender<ProcessingEntry>,
    close: CancellationToken,
    cancel: CancellationToken,
) {
    let mut closed = false;
    'input: loop {
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
        metrics::counter!(PIPELINE_ENTRIES_RECEIVED_TOTAL).increment(1);

        let send = pipeline_tx.send(ProcessingEntry::new(entry));
        tokio::pin!(send);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'input,
                _ = close.cancelled(), if !closed => {
                    rx.close();
                    closed = true;
                }
                res = &mut send => {
                    if res.is_err() {
                        warn!("pipeline input closed unexpectedly");
                        break 'input;
                    }
                    break;
                }
            }
        }
    }
    // pipeline_tx drop으로 첫 스테이지에 종료가 전파된다
}

/// 출력 태스크: 속도 제한 후 추출 맵을 버리고 다음 핸들러로 전달합니다.
async fn run_output(
    mut pipeline_out: mpsc::Receiver<ProcessingEntry>,
    next: mpsc::Sender<Entry>,
    limiter: Option<Arc<EntryRateLimiter>>,
    counter: DropCounter,
    cancel: CancellationToken,
) {
    loop {
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            entry = pipeline_out.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };

        if let Some(limiter) = &limiter {
            if !limiter.admit(&counter, &cancel).await {
                if cancel.is_cancelled() {
                    break;
                }
                continue;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = next.send(entry.into_entry()) => {
                if res.is_err() {
                    warn!("next handler closed its input, stopping pipeline output");
                    break;
                }
                metrics::counter!(PIPELINE_ENTRIES_SENT_TOTAL).increment(1);
            }
        }
    }
}

/// 파이프라인 핸들러
///
/// `stop()`은 입력을 닫고 두 태스크가 끝날 때까지 타임아웃 없이 기다립니다.
/// 정지하지 않은 채 drop되면 모든 태스크를 취소합니다.
pub struct PipelineHandler {
    tx: mpsc::Sender<Entry>,
    close: CancellationToken,
    cancel: CancellationToken,
    tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
    counter: DropCounter,
}

impl PipelineHandler {
    /// 파이프라인이 공유하는 드롭 카운터
    pub fn drop_counter(&self) -> &DropCounter {
        &self.counter
    }

    /// 정지 완료 여부
    pub fn is_stopped(&self) -> bool {
        self.tasks.is_none()
    }
}

impl EntryHandler for PipelineHandler {
    fn sender(&self) -> mpsc::Sender<Entry> {
        self.tx.clone()
    }

    fn stop(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some((input, output)) = self.tasks.take() else {
                return;
            };
            self.close.cancel();

            for (name, task) in [("input", input), ("output", output)] {
                if let Err(e) = task.await {
                    error!(task = name, error = %e, "pipeline task panicked");
                }
            }
            info!(dropped = self.counter.total(), "pipeline stopped");
        })
    }
}

impl Drop for PipelineHandler {
    fn drop(&mut self) {
        if self.tasks.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::stage_config::{
        DropStageConfig, LabelsStageConfig, StaticLabelsStageConfig,
    };
    use logweave_core::{ChannelHandler, LabelSet};
    use std::time::Duration;

    fn entry(line: &str, labels: &[(&str, &str)]) -> Entry {
        Entry::now(LabelSet::from_pairs(labels.iter().copied()).unwrap(), line)
    }

    #[test]
    fn first_config_error_wins() {
        let configs = vec![
            StageConfig::StaticLabels(StaticLabelsStageConfig::default()),
            StageConfig::Drop(DropStageConfig::default()),
        ];
        let err = Pipeline::new(&configs, &StageContext::default()).unwrap_err();
        assert!(err.to_string().contains("static_labels"), "{err}");
    }

    #[test]
    fn stage_names_follow_declaration_order() {
        let mut values = std::collections::BTreeMap::new();
        values.insert("app".to_owned(), String::new());
        let configs = vec![
            StageConfig::Labels(LabelsStageConfig { values }),
            StageConfig::Decolorize(Default::default()),
        ];
        let pipeline = Pipeline::new(&configs, &StageContext::default()).unwrap();
        assert_eq!(pipeline.stage_names(), vec!["labels", "decolorize"]);
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn wrap_forwards_processed_entries_in_order() {
        let mut values = std::collections::BTreeMap::new();
        values.insert("app".to_owned(), String::new());
        let configs = vec![StageConfig::Labels(LabelsStageConfig { values })];
        let pipeline = Pipeline::new(&configs, &StageContext::default()).unwrap();

        let (sink, mut rx) = ChannelHandler::new(1);
        let mut handler = pipeline.wrap(&sink, None);
        let tx = handler.sender();

        let producer = tokio::spawn(async move {
            for i in 0..10 {
                tx.send(entry(&format!("l{i}"), &[("app", "web")])).await.unwrap();
            }
        });
        let mut lines = Vec::new();
        for _ in 0..10 {
            let e = rx.recv().await.unwrap();
            assert_eq!(e.labels.get("app"), Some("web"));
            lines.push(e.line);
        }
        producer.await.unwrap();
        handler.stop().await;

        let expected: Vec<_> = (0..10).map(|i| format!("l{i}")).collect();
        assert_eq!(lines, expected);
        assert!(handler.is_stopped());
    }

    #[tokio::test]
    async fn stop_drains_and_is_idempotent() {
        let pipeline = Pipeline::new(&[], &StageContext::default()).unwrap();
        let (sink, mut rx) = ChannelHandler::new(16);
        let mut handler = pipeline.wrap(&sink, None);

        handler.sender().send(entry("a", &[])).await.unwrap();
        handler.stop().await;
        handler.stop().await;

        assert_eq!(rx.recv().await.unwrap().line, "a");
        assert!(handler.sender().send(entry("late", &[])).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_input_while_downstream_is_full() {
        let pipeline = Pipeline::new(&[], &StageContext::default()).unwrap();
        let (sink, mut rx) = ChannelHandler::new(1);
        let mut handler = pipeline.wrap(&sink, None);
        let tx = handler.sender();

        // 모든 단계 버퍼가 찰 때까지 보낸다
        let mut sent = 0;
        while tokio::time::timeout(Duration::from_millis(10), tx.send(entry("x", &[])))
            .await
            .is_ok()
        {
            sent += 1;
        }

        let stopper = tokio::spawn(async move { handler.stop().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tx.send(entry("late", &[])).await.is_err());

        for _ in 0..sent {
            assert_eq!(rx.recv().await.unwrap().line, "x");
        }
        stopper.await.unwrap();
    }

    #[tokio::test]
    async fn drop_cancels_tasks() {
        let pipeline = Pipeline::new(&[], &StageContext::default()).unwrap();
        let (sink, _rx) = ChannelHandler::new(1);
        let handler = pipeline.wrap(&sink, None);
        let tx = handler.sender();
        drop(handler);
        // 입력 태스크가 취소되어 결국 채널이 닫힌다
        tx.closed().await;
    }
}
