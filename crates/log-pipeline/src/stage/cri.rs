//! CRI 로그 프리셋
//!
//! `<time> <stream> <flags> <content>` 형식의 컨테이너 런타임 로그를 해석합니다.
//! `P` 플래그는 partial 라인이며, 같은 스트림의 다음 `F` 라인에 이어 붙여 방출합니다.

use logweave_core::stage_config::{
    CriStageConfig, LabelsStageConfig, OutputStageConfig, RegexStageConfig, TimestampStageConfig,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::labels::LabelSetStage;
use super::output::OutputStage;
use super::regexp::RegexStage;
use super::timestamp::TimestampStage;
use super::{MapStage, RunContext, Stage, StageContext, forward, recv};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;
use crate::pipeline::Pipeline;

/// CRI 라인 정규식
pub const CRI_EXPRESSION: &str =
    r"^(?s)(?P<time>\S+?) (?P<stream>stdout|stderr) (?P<flags>\S+?) (?P<content>.+)$";

const KEY_FLAGS: &str = "flags";
const KEY_STREAM: &str = "stream";
const KEY_CONTENT: &str = "content";
const FLAG_PARTIAL: &str = "P";

/// `max`바이트 이하의 문자 경계에서 자릅니다. `max`가 0이면 그대로 둡니다.
fn truncate(content: &mut String, max: usize) {
    if max == 0 || content.len() <= max {
        return;
    }
    let mut cut = max;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
}

/// CRI partial 라인 결합기
pub struct CriJoiner {
    max_partial_lines: usize,
    /// 0이면 자르지 않음
    truncate_at: usize,
    /// (스트림 키, 누적 엔트리), 최초 도착 순서
    partials: Vec<(String, ProcessingEntry)>,
}

impl CriJoiner {
    pub fn new(config: &CriStageConfig) -> Result<Self, LogPipelineError> {
        if config.max_partial_lines == 0 {
            return Err(LogPipelineError::stage(
                "cri",
                "max_partial_lines must be greater than 0",
            ));
        }
        let truncate_at = if config.max_partial_line_size_truncate {
            config.max_partial_line_size
        } else {
            0
        };
        Ok(Self {
            max_partial_lines: config.max_partial_lines,
            truncate_at,
            partials: Vec::new(),
        })
    }

    fn content(entry: &ProcessingEntry) -> String {
        entry.extracted_string(KEY_CONTENT).unwrap_or_default()
    }

    fn set_content(&self, entry: &mut ProcessingEntry, mut content: String) {
        truncate(&mut content, self.truncate_at);
        entry
            .extracted
            .insert(KEY_CONTENT.to_owned(), serde_json::Value::String(content));
    }

    /// 엔트리 하나를 처리하고 방출할 엔트리들을 순서대로 반환합니다.
    fn push(&mut self, mut entry: ProcessingEntry) -> Vec<ProcessingEntry> {
        let Some(flags) = entry.extracted_string(KEY_FLAGS) else {
            return vec![entry];
        };
        let key = format!(
            "{}{}",
            entry.entry.labels.fingerprint(),
            entry.extracted_string(KEY_STREAM).unwrap_or_default()
        );
        let position = self.partials.iter().position(|(k, _)| *k == key);

        if flags == FLAG_PARTIAL {
            if self.partials.len() >= self.max_partial_lines {
                debug!(
                    max_partial_lines = self.max_partial_lines,
                    "cri partial buffer full, flushing"
                );
                let flushed = std::mem::take(&mut self.partials)
                    .into_iter()
                    .map(|(_, e)| e)
                    .collect();
                let content = Self::content(&entry);
                self.set_content(&mut entry, content);
                self.partials.push((key, entry));
                return flushed;
            }
            match position {
                Some(i) => {
                    // 첫 partial의 메타데이터를 유지하고 내용만 이어 붙인다
                    let mut joined = Self::content(&self.partials[i].1);
                    joined.push_str(&Self::content(&entry));
                    truncate(&mut joined, self.truncate_at);
                    self.partials[i]
                        .1
                        .extracted
                        .insert(KEY_CONTENT.to_owned(), serde_json::Value::String(joined));
                }
                None => {
                    let content = Self::content(&entry);
                    self.set_content(&mut entry, content);
                    self.partials.push((key, entry));
                }
            }
            return Vec::new();
        }

        let mut content = Self::content(&entry);
        if let Some(i) = position {
            let (_, buffered) = self.partials.remove(i);
            content = Self::content(&buffered) + &content;
        }
        self.set_content(&mut entry, content);
        vec![entry]
    }

    fn drain(&mut self) -> Vec<ProcessingEntry> {
        std::mem::take(&mut self.partials)
            .into_iter()
            .map(|(_, e)| e)
            .collect()
    }
}

impl Stage for CriJoiner {
    fn name(&self) -> &'static str {
        "cri"
    }

    fn run(
        self: Box<Self>,
        mut input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry> {
        let (tx, rx) = ctx.channel();
        let mut joiner = *self;
        tokio::spawn(async move {
            'outer: while let Some(entry) = recv(&mut input, &ctx.cancel).await {
                for ready in joiner.push(entry) {
                    if !forward(&tx, ready, &ctx.cancel).await {
                        break 'outer;
                    }
                }
            }
            if ctx.cancel.is_cancelled() {
                return;
            }
            for ready in joiner.drain() {
                if !forward(&tx, ready, &ctx.cancel).await {
                    break;
                }
            }
        });
        rx
    }
}

/// CRI 프리셋 파이프라인을 생성합니다.
pub fn pipeline(config: &CriStageConfig, ctx: &StageContext) -> Result<Pipeline, LogPipelineError> {
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(MapStage(RegexStage::new(&RegexStageConfig {
            expression: CRI_EXPRESSION.to_owned(),
            source: None,
        })?)),
        Box::new(CriJoiner::new(config)?),
        Box::new(MapStage(LabelSetStage::new(&LabelsStageConfig {
            values: [(KEY_STREAM.to_owned(), String::new())].into_iter().collect(),
        })?)),
        Box::new(MapStage(TimestampStage::new(&TimestampStageConfig {
            source: "time".to_owned(),
            format: "RFC3339Nano".to_owned(),
            ..Default::default()
        })?)),
        Box::new(MapStage(OutputStage::new(&OutputStageConfig {
            source: KEY_CONTENT.to_owned(),
        })?)),
    ];
    Ok(Pipeline::from_stages(stages, ctx.clone()))
}
