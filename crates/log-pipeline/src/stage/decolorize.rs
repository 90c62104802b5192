//! decolorize 스테이지 -- ANSI 이스케이프 시퀀스 제거

use regex::Regex;

use super::Processor;
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// CSI 시퀀스(색상, 커서 이동 등), OSC 시퀀스, 2바이트 이스케이프
const ANSI_ESCAPE: &str =
    r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]";

/// decolorize 스테이지
#[derive(Debug)]
pub struct DecolorizeStage {
    escape: Regex,
}

impl DecolorizeStage {
    pub fn new() -> Result<Self, LogPipelineError> {
        Ok(Self {
            escape: Regex::new(ANSI_ESCAPE)?,
        })
    }
}

impl Processor for DecolorizeStage {
    fn name(&self) -> &'static str {
        "decolorize"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        if !entry.entry.line.contains('\x1b') {
            return;
        }
        let stripped = self.escape.replace_all(&entry.entry.line, "");
        entry.entry.line = stripped.into_owned();
    }
}
