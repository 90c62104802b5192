//! 멀티라인 스테이지 -- 여러 줄 블록을 하나의 엔트리로 결합
//!
//! 스트림(레이블 집합)마다 블록을 버퍼링합니다. `firstline`에 매칭되는 줄이 새 블록을
//! 시작하고, 그 외의 줄은 현재 블록에 이어 붙습니다. 블록은 다음 경우에 방출됩니다.
//! - 같은 스트림에 새 firstline 도착
//! - `max_lines` 도달
//! - `max_wait_time` 동안 갱신 없음
//! - 입력 채널 종료

use std::collections::BTreeMap;
use std::time::Duration;

use logweave_core::stage_config::MultilineStageConfig;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{RunContext, Stage, forward, parse_duration};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// 버퍼링 중인 블록
struct Block {
    /// 첫 줄의 엔트리 (레이블, 타임스탬프, 추출 맵 유지)
    first: ProcessingEntry,
    lines: Vec<String>,
    last_update: Instant,
}

impl Block {
    fn start(entry: ProcessingEntry, now: Instant) -> Self {
        let lines = vec![entry.entry.line.clone()];
        Self {
            first: entry,
            lines,
            last_update: now,
        }
    }

    fn finish(self) -> ProcessingEntry {
        let mut entry = self.first;
        entry.entry.line = self.lines.join("\n");
        entry
    }
}

/// 멀티라인 스테이지
pub struct MultilineStage {
    firstline: Regex,
    max_wait: Duration,
    max_lines: usize,
    blocks: BTreeMap<String, Block>,
}

impl MultilineStage {
    pub fn new(config: &MultilineStageConfig) -> Result<Self, LogPipelineError> {
        if config.firstline.is_empty() {
            return Err(LogPipelineError::stage("multiline", "firstline is required"));
        }
        let max_wait = parse_duration("multiline", "max_wait_time", &config.max_wait_time)?;
        if max_wait.is_zero() {
            return Err(LogPipelineError::stage(
                "multiline",
                "max_wait_time must be greater than 0",
            ));
        }
        if config.max_lines == 0 {
            return Err(LogPipelineError::stage(
                "multiline",
                "max_lines must be greater than 0",
            ));
        }
        Ok(Self {
            firstline: Regex::new(&config.firstline)?,
            max_wait,
            max_lines: config.max_lines,
            blocks: BTreeMap::new(),
        })
    }

    /// 엔트리 하나를 버퍼에 반영하고 방출할 블록을 반환합니다.
    fn push(&mut self, entry: ProcessingEntry, now: Instant) -> Vec<ProcessingEntry> {
        let key = entry.entry.labels.fingerprint();
        let mut flushed = Vec::new();

        if self.firstline.is_match(&entry.entry.line) {
            if let Some(previous) = self.blocks.remove(&key) {
                flushed.push(previous.finish());
            }
            self.blocks.insert(key.clone(), Block::start(entry, now));
        } else if let Some(block) = self.blocks.get_mut(&key) {
            block.lines.push(entry.entry.line);
            block.last_update = now;
        } else {
            self.blocks.insert(key.clone(), Block::start(entry, now));
        }

        if self
            .blocks
            .get(&key)
            .is_some_and(|b| b.lines.len() >= self.max_lines)
        {
            if let Some(full) = self.blocks.remove(&key) {
                flushed.push(full.finish());
            }
        }
        flushed
    }

    /// `max_wait` 동안 갱신되지 않은 블록을 꺼냅니다.
    fn expire(&mut self, now: Instant) -> Vec<ProcessingEntry> {
        let expired: Vec<String> = self
            .blocks
            .iter()
            .filter(|(_, b)| now.duration_since(b.last_update) >= self.max_wait)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| self.blocks.remove(&k))
            .map(Block::finish)
            .collect()
    }

    fn drain(&mut self) -> Vec<ProcessingEntry> {
        std::mem::take(&mut self.blocks)
            .into_values()
            .map(Block::finish)
            .collect()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.blocks
            .values()
            .map(|b| b.last_update + self.max_wait)
            .min()
    }
}

impl Stage for MultilineStage {
    fn name(&self) -> &'static str {
        "multiline"
    }

    fn run(
        self: Box<Self>,
        mut input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry> {
        let (tx, rx) = ctx.channel();
        let mut stage = *self;
        tokio::spawn(async move {
            'outer: loop {
                let deadline = stage.next_deadline();
                let ready = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    received = input.recv() => match received {
                        Some(entry) => stage.push(entry, Instant::now()),
                        None => {
                            for entry in stage.drain() {
                                if !forward(&tx, entry, &ctx.cancel).await {
                                    break;
                                }
                            }
                            break;
                        }
                    },
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() => stage.expire(Instant::now()),
                };
                for entry in ready {
                    if !forward(&tx, entry, &ctx.cancel).await {
                        break 'outer;
                    }
                }
            }
        });
        rx
    }
}
