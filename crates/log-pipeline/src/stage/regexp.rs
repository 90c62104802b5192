//! 정규식 추출 스테이지
//!
//! 이름 있는 캡처 그룹을 추출 맵에 기록합니다. 매칭되지 않은 그룹은 건너뜁니다.

use logweave_core::stage_config::RegexStageConfig;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// 정규식 추출 스테이지
pub struct RegexStage {
    expression: Regex,
    names: Vec<String>,
    source: Option<String>,
}

impl RegexStage {
    pub fn new(config: &RegexStageConfig) -> Result<Self, LogPipelineError> {
        if config.expression.is_empty() {
            return Err(LogPipelineError::stage("regex", "expression is required"));
        }
        let expression = Regex::new(&config.expression)?;
        let names: Vec<String> = expression
            .capture_names()
            .flatten()
            .map(str::to_owned)
            .collect();
        if names.is_empty() {
            return Err(LogPipelineError::stage(
                "regex",
                "expression must contain at least one named capture group",
            ));
        }
        Ok(Self {
            expression,
            names,
            source: config.source.clone(),
        })
    }
}

impl Processor for RegexStage {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        let input = match &self.source {
            Some(source) => match entry.extracted_string(source) {
                Some(s) => s,
                None => {
                    debug!(source = %source, "regex source missing or not a string");
                    soft_failure("regex");
                    return;
                }
            },
            None => entry.entry.line.clone(),
        };

        let Some(captures) = self.expression.captures(&input) else {
            debug!("regex did not match");
            return;
        };
        for name in &self.names {
            if let Some(m) = captures.name(name) {
                entry
                    .extracted
                    .insert(name.clone(), Value::String(m.as_str().to_owned()));
            }
        }
    }
}
