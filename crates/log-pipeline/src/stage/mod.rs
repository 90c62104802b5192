//! 스테이지 -- 채널에서 채널로의 단항 변환
//!
//! 모든 스테이지는 [`Stage`] trait을 구현합니다. `run()`은 입력 채널을 소비하는 태스크를
//! 띄우고 출력 채널을 반환합니다. 출력 채널은 입력이 모두 처리된 뒤에만 닫힙니다.
//!
//! 대부분의 스테이지는 두 가지 헬퍼 형태 중 하나를 사용합니다.
//! - [`Processor`] + [`MapStage`]: 엔트리마다 정확히 하나의 엔트리를 출력 (map)
//! - [`Filter`] + [`FilterStage`]: 엔트리마다 전달 여부를 결정 (filter-map)
//!
//! 버퍼링이나 대기가 필요한 스테이지(limit, multiline, CRI joiner)는 `Stage`를 직접 구현합니다.

pub mod cri;
pub mod decolorize;
pub mod docker;
pub mod drop;
pub mod geoip;
pub mod json;
pub mod labels;
pub mod limit;
pub mod logfmt;
pub mod metric;
pub mod multiline;
pub mod output;
pub mod regexp;
pub mod template;
pub mod timestamp;

use std::time::Duration;

use logweave_core::metrics::{LABEL_STAGE, STAGE_SOFT_FAILURES_TOTAL};
use logweave_core::stage_config::StageConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::counter::DropCounter;
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// 단계 사이 채널 용량 기본값 (직접 전달에 가장 가까운 값)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// 스테이지 실행 컨텍스트
#[derive(Debug, Clone)]
pub struct RunContext {
    /// 파이프라인 취소 토큰
    pub cancel: CancellationToken,
    /// 출력 채널 용량
    pub capacity: usize,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// 출력 채널 용량을 지정합니다.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// 이 컨텍스트의 용량으로 채널을 생성합니다.
    pub fn channel(&self) -> (mpsc::Sender<ProcessingEntry>, mpsc::Receiver<ProcessingEntry>) {
        mpsc::channel(self.capacity)
    }
}

/// 스테이지 생성 컨텍스트 (파이프라인 단위로 공유되는 자원)
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// 파이프라인 공유 드롭 카운터
    pub drop_counter: DropCounter,
}

impl StageContext {
    pub fn new(drop_counter: DropCounter) -> Self {
        Self { drop_counter }
    }
}

/// 스테이지
pub trait Stage: Send {
    /// 스테이지 종류 이름
    fn name(&self) -> &'static str;

    /// 입력 채널을 소비하는 태스크를 시작하고 출력 채널을 반환합니다.
    fn run(
        self: Box<Self>,
        input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry>;
}

/// map 형태 스테이지의 엔트리 처리기
pub trait Processor: Send + 'static {
    fn name(&self) -> &'static str;

    /// 엔트리를 제자리에서 변환합니다.
    fn process(&mut self, entry: &mut ProcessingEntry);
}

/// filter-map 형태 스테이지의 판정기
pub trait Filter: Send + 'static {
    fn name(&self) -> &'static str;

    /// `false`면 엔트리를 전달하지 않습니다.
    fn keep(&mut self, entry: &mut ProcessingEntry) -> bool;
}

/// [`Processor`]를 스테이지로 실행합니다.
pub struct MapStage<P>(pub P);

impl<P: Processor> Stage for MapStage<P> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn run(
        self: Box<Self>,
        mut input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry> {
        let (tx, rx) = ctx.channel();
        let mut processor = self.0;
        tokio::spawn(async move {
            while let Some(mut entry) = recv(&mut input, &ctx.cancel).await {
                processor.process(&mut entry);
                if !forward(&tx, entry, &ctx.cancel).await {
                    break;
                }
            }
        });
        rx
    }
}

/// [`Filter`]를 스테이지로 실행합니다.
pub struct FilterStage<F>(pub F);

impl<F: Filter> Stage for FilterStage<F> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn run(
        self: Box<Self>,
        mut input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry> {
        let (tx, rx) = ctx.channel();
        let mut filter = self.0;
        tokio::spawn(async move {
            while let Some(mut entry) = recv(&mut input, &ctx.cancel).await {
                if !filter.keep(&mut entry) {
                    continue;
                }
                if !forward(&tx, entry, &ctx.cancel).await {
                    break;
                }
            }
        });
        rx
    }
}

/// 취소를 고려해 다음 엔트리를 수신합니다. 입력이 끝났거나 취소되면 `None`.
pub(crate) async fn recv(
    input: &mut mpsc::Receiver<ProcessingEntry>,
    cancel: &CancellationToken,
) -> Option<ProcessingEntry> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        entry = input.recv() => entry,
    }
}

/// 취소를 고려해 엔트리를 전달합니다. 전달하지 못하면 `false`.
pub(crate) async fn forward(
    tx: &mpsc::Sender<ProcessingEntry>,
    entry: ProcessingEntry,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = tx.send(entry) => res.is_ok(),
    }
}

/// 엔트리 단위 soft failure를 기록합니다.
pub(crate) fn soft_failure(stage: &'static str) {
    metrics::counter!(STAGE_SOFT_FAILURES_TOTAL, LABEL_STAGE => stage).increment(1);
}

/// humantime 기간 문자열을 파싱합니다.
pub(crate) fn parse_duration(
    stage: &'static str,
    field: &str,
    value: &str,
) -> Result<Duration, LogPipelineError> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        LogPipelineError::stage(stage, format!("invalid {field} '{value}': {e}"))
    })
}

/// 설정 블록 하나로 스테이지를 생성합니다.
pub fn build_stage(
    config: &StageConfig,
    ctx: &StageContext,
) -> Result<Box<dyn Stage>, LogPipelineError> {
    let stage: Box<dyn Stage> = match config {
        StageConfig::Json(c) => Box::new(FilterStage(json::JsonStage::new(c, ctx)?)),
        StageConfig::Logfmt(c) => Box::new(MapStage(logfmt::LogfmtStage::new(c)?)),
        StageConfig::Regex(c) => Box::new(MapStage(regexp::RegexStage::new(c)?)),
        StageConfig::Labels(c) => Box::new(MapStage(labels::LabelSetStage::new(c)?)),
        StageConfig::LabelDrop(c) => Box::new(MapStage(labels::LabelDropStage::new(c)?)),
        StageConfig::LabelKeep(c) => Box::new(MapStage(labels::LabelKeepStage::new(c)?)),
        StageConfig::StaticLabels(c) => {
            Box::new(MapStage(labels::StaticLabelsStage::new(c)?))
        }
        StageConfig::Output(c) => Box::new(MapStage(output::OutputStage::new(c)?)),
        StageConfig::Template(c) => Box::new(MapStage(template::TemplateStage::new(c)?)),
        StageConfig::Timestamp(c) => Box::new(MapStage(timestamp::TimestampStage::new(c)?)),
        StageConfig::Drop(c) => Box::new(FilterStage(drop::DropStage::new(c, ctx)?)),
        StageConfig::Limit(c) => Box::new(limit::LimitStage::new(c, ctx)?),
        StageConfig::Metrics(c) => Box::new(MapStage(metric::MetricsStage::new(c)?)),
        StageConfig::Geoip(c) => Box::new(MapStage(geoip::GeoIpStage::open(c)?)),
        StageConfig::Multiline(c) => Box::new(multiline::MultilineStage::new(c)?),
        StageConfig::Docker(_) => Box::new(docker::pipeline(ctx)?),
        StageConfig::Cri(c) => Box::new(cri::pipeline(c, ctx)?),
        StageConfig::Decolorize(_) => Box::new(MapStage(decolorize::DecolorizeStage::new()?)),
    };
    Ok(stage)
}
