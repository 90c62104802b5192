//! 드롭 스테이지 -- 조건을 모두 만족하는 엔트리를 버림
//!
//! 설정된 조건은 AND로 결합됩니다. 아래 순서로 평가하며, 하나라도 만족하지 않으면
//! 즉시 "드롭하지 않음"으로 끝납니다.
//!
//! 1. `longer_than`: 라인 길이가 값보다 **큰** 경우 (같으면 유지)
//! 2. `older_than`: 타임스탬프가 `now - older_than`보다 이전인 경우
//! 3. `source` (+ `value`): 추출 맵에 키가 있고, `value`가 있으면 정확히 같은 경우
//! 4. `expression`: `source` 값 또는 라인이 정규식과 일치하는 경우

use std::time::Duration;

use chrono::Utc;
use logweave_core::stage_config::DropStageConfig;
use regex::Regex;
use tracing::debug;

use super::{Filter, StageContext, parse_duration};
use crate::counter::DropCounter;
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// 드롭 스테이지
pub struct DropStage {
    source: Option<String>,
    value: Option<String>,
    expression: Option<Regex>,
    older_than: Option<chrono::Duration>,
    longer_than: Option<usize>,
    reason: String,
    counter: DropCounter,
}

impl DropStage {
    pub fn new(config: &DropStageConfig, ctx: &StageContext) -> Result<Self, LogPipelineError> {
        if config.source.is_none()
            && config.expression.is_none()
            && config.older_than.is_none()
            && config.longer_than.is_none()
        {
            return Err(LogPipelineError::stage(
                "drop",
                "one of source, expression, older_than or longer_than is required",
            ));
        }
        if config.value.is_some() && config.expression.is_some() {
            return Err(LogPipelineError::stage(
                "drop",
                "value and expression are mutually exclusive",
            ));
        }

        let expression = config
            .expression
            .as_deref()
            .map(Regex::new)
            .transpose()?;

        let older_than = config
            .older_than
            .as_deref()
            .map(|s| parse_duration("drop", "older_than", s))
            .transpose()?
            .map(to_chrono)
            .transpose()?;

        let reason = if config.drop_counter_reason.is_empty() {
            logweave_core::stage_config::DEFAULT_DROP_REASON.to_owned()
        } else {
            config.drop_counter_reason.clone()
        };

        Ok(Self {
            source: config.source.clone(),
            value: config.value.clone(),
            expression,
            older_than,
            longer_than: config.longer_than,
            reason,
            counter: ctx.drop_counter.clone(),
        })
    }

    fn should_drop(&self, entry: &ProcessingEntry) -> bool {
        if let Some(max) = self.longer_than {
            if entry.entry.line.len() <= max {
                return false;
            }
        }

        if let Some(age) = self.older_than {
            match Utc::now().checked_sub_signed(age) {
                Some(cutoff) if entry.entry.timestamp < cutoff => {}
                _ => return false,
            }
        }

        if let (Some(source), None) = (&self.source, &self.expression) {
            let Some(extracted) = entry.extracted.get(source) else {
                return false;
            };
            if let Some(expected) = &self.value {
                match crate::entry::value_to_string(extracted) {
                    Some(actual) if actual == *expected => {}
                    _ => return false,
                }
            }
        }

        if let Some(expression) = &self.expression {
            let matched = match &self.source {
                Some(source) => match entry.extracted_string(source) {
                    Some(value) => expression.is_match(&value),
                    None => {
                        debug!(source = %source, "drop source missing or not a string");
                        false
                    }
                },
                None => expression.is_match(&entry.entry.line),
            };
            if !matched {
                return false;
            }
        }

        true
    }
}

/// 현재 시각에서 뺄 수 있는 기간만 허용합니다.
fn to_chrono(d: Duration) -> Result<chrono::Duration, LogPipelineError> {
    let age = chrono::Duration::from_std(d)
        .map_err(|e| LogPipelineError::stage("drop", format!("older_than out of range: {e}")))?;
    if Utc::now().checked_sub_signed(age).is_none() {
        return Err(LogPipelineError::stage(
            "drop",
            "older_than exceeds the representable date range",
        ));
    }
    Ok(age)
}

impl Filter for DropStage {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn keep(&mut self, entry: &mut ProcessingEntry) -> bool {
        if self.should_drop(entry) {
            self.counter.inc(&self.reason);
            return false;
        }
        true
    }
}
