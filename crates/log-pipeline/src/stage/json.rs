//! JSON 추출 스테이지
//!
//! 라인(또는 `source` 값)을 JSON 객체로 파싱하고, 설정된 경로의 값을 추출 맵에 기록합니다.
//!
//! # 경로 문법
//! - `.`으로 구분된 키: `request.method`
//! - 배열 인덱스: `items[0].name`
//! - 점을 포함한 키는 따옴표로 감쌈: `labels."app.kubernetes.io/name"`

use logweave_core::stage_config::JsonStageConfig;
use serde_json::Value;
use tracing::debug;

use super::{Filter, StageContext, soft_failure};
use crate::counter::{DropCounter, REASON_DROP_MALFORMED};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// JSON 경로 세그먼트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// 경로 문자열을 세그먼트 목록으로 파싱합니다.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch) => key.push(ch),
                        None => return Err(format!("unterminated quote in '{path}'")),
                    }
                }
                segments.push(PathSegment::Key(key));
            }
            '[' => {
                chars.next();
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => digits.push(ch),
                        None => return Err(format!("unterminated index in '{path}'")),
                    }
                }
                let index = digits
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid index '{digits}' in '{path}'"))?;
                segments.push(PathSegment::Index(index));
            }
            _ => {
                let mut key = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '.' || ch == '[' {
                        break;
                    }
                    key.push(ch);
                    chars.next();
                }
                segments.push(PathSegment::Key(key));
            }
        }
    }

    if segments.is_empty() {
        return Err(format!("empty path '{path}'"));
    }
    Ok(segments)
}

fn lookup<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Key(key) => current.get(key.as_str()),
        PathSegment::Index(i) => current.get(*i),
    })
}

/// JSON 추출 스테이지
pub struct JsonStage {
    expressions: Vec<(String, Vec<PathSegment>)>,
    source: Option<String>,
    drop_malformed: bool,
    counter: DropCounter,
}

impl JsonStage {
    pub fn new(config: &JsonStageConfig, ctx: &StageContext) -> Result<Self, LogPipelineError> {
        if config.expressions.is_empty() {
            return Err(LogPipelineError::stage("json", "expressions must not be empty"));
        }

        let expressions = config
            .expressions
            .iter()
            .map(|(key, path)| {
                let path = if path.is_empty() { key } else { path };
                parse_path(path)
                    .map(|segments| (key.clone(), segments))
                    .map_err(|reason| LogPipelineError::stage("json", reason))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expressions,
            source: config.source.clone(),
            drop_malformed: config.drop_malformed,
            counter: ctx.drop_counter.clone(),
        })
    }

    fn parse_input(&self, entry: &ProcessingEntry) -> Option<Value> {
        let input = match &self.source {
            Some(source) => match entry.extracted.get(source) {
                Some(Value::String(s)) => s.as_str(),
                _ => {
                    debug!(source = %source, "json source missing or not a string");
                    return None;
                }
            },
            None => entry.entry.line.as_str(),
        };

        match serde_json::from_str::<Value>(input) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => {
                debug!("json input is not an object");
                None
            }
            Err(e) => {
                debug!(error = %e, "failed to parse json input");
                None
            }
        }
    }
}

impl Filter for JsonStage {
    fn name(&self) -> &'static str {
        "json"
    }

    fn keep(&mut self, entry: &mut ProcessingEntry) -> bool {
        let Some(root) = self.parse_input(entry) else {
            soft_failure("json");
            if self.drop_malformed {
                self.counter.inc(REASON_DROP_MALFORMED);
                return false;
            }
            return true;
        };

        for (key, path) in &self.expressions {
            let Some(found) = lookup(&root, path) else {
                continue;
            };
            let value = match found {
                Value::Object(_) | Value::Array(_) => Value::String(found.to_string()),
                other => other.clone(),
            };
            entry.extracted.insert(key.clone(), value);
        }
        true
    }
}
