//! 출력 스테이지 -- 라인을 추출 맵 값으로 교체

use logweave_core::stage_config::OutputStageConfig;
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// `extracted[source]`로 라인을 교체합니다. 값이 없거나 문자열로 바꿀 수 없으면 그대로 둡니다.
pub struct OutputStage {
    source: String,
}

impl OutputStage {
    pub fn new(config: &OutputStageConfig) -> Result<Self, LogPipelineError> {
        if config.source.is_empty() {
            return Err(LogPipelineError::stage("output", "source is required"));
        }
        Ok(Self {
            source: config.source.clone(),
        })
    }
}

impl Processor for OutputStage {
    fn name(&self) -> &'static str {
        "output"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        match entry.extracted_string(&self.source) {
            Some(line) => entry.entry.line = line,
            None => {
                debug!(source = %self.source, "output source missing or not a string, line unchanged");
                soft_failure("output");
            }
        }
    }
}
