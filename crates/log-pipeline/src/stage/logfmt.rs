//! logfmt 추출 스테이지
//!
//! `key=value key2="quoted value" flag` 형식을 파싱합니다.
//! 값 없는 키는 빈 문자열로 취급합니다.

use std::collections::HashMap;

use logweave_core::stage_config::LogfmtStageConfig;
use serde_json::Value;
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// logfmt 라인을 키/값 쌍으로 파싱합니다. 같은 키가 반복되면 마지막 값이 남습니다.
pub fn parse_logfmt(line: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('r') => value.push('\r'),
                            Some(other) => value.push(other),
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        if !key.is_empty() {
            pairs.insert(key, value);
        }
    }

    pairs
}

/// logfmt 추출 스테이지
pub struct LogfmtStage {
    /// 추출 맵 키 → logfmt 키
    mapping: Vec<(String, String)>,
    source: Option<String>,
}

impl LogfmtStage {
    pub fn new(config: &LogfmtStageConfig) -> Result<Self, LogPipelineError> {
        if config.mapping.is_empty() {
            return Err(LogPipelineError::stage("logfmt", "mapping must not be empty"));
        }
        let mapping = config
            .mapping
            .iter()
            .map(|(key, field)| {
                let field = if field.is_empty() { key } else { field };
                (key.clone(), field.clone())
            })
            .collect();
        Ok(Self {
            mapping,
            source: config.source.clone(),
        })
    }
}

impl Processor for LogfmtStage {
    fn name(&self) -> &'static str {
        "logfmt"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        let input = match &self.source {
            Some(source) => match entry.extracted_string(source) {
                Some(s) => s,
                None => {
                    debug!(source = %source, "logfmt source missing or not a string");
                    soft_failure("logfmt");
                    return;
                }
            },
            None => entry.entry.line.clone(),
        };

        let mut parsed = parse_logfmt(&input);
        for (key, field) in &self.mapping {
            if let Some(value) = parsed.remove(field) {
                entry.extracted.insert(key.clone(), Value::String(value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_util::processing;
    use serde_json::json;

    #[test]
    fn parses_plain_quoted_and_bare() {
        let parsed = parse_logfmt(r#"level=info msg="hello \"world\"\n" debug path=/x"#);
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["msg"], "hello \"world\"\n");
        assert_eq!(parsed["debug"], "");
        assert_eq!(parsed["path"], "/x");
    }

    #[test]
    fn tolerates_extra_whitespace_and_empty_values() {
        let parsed = parse_logfmt("  a=   b=2  ");
        assert_eq!(parsed["a"], "");
        assert_eq!(parsed["b"], "2");
    }

    #[test]
    fn maps_fields_into_extracted() {
        let mut stage = LogfmtStage::new(&LogfmtStageConfig {
            mapping: [("level", ""), ("message", "msg")]
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            source: None,
        })
        .unwrap();

        let mut pe = processing(r#"ts=1 level=warn msg="disk full""#, &[]);
        stage.process(&mut pe);
        assert_eq!(pe.extracted["level"], json!("warn"));
        assert_eq!(pe.extracted["message"], json!("disk full"));
        assert!(!pe.extracted.contains_key("ts"));
    }

    #[test]
    fn empty_mapping_is_config_error() {
        assert!(LogfmtStage::new(&LogfmtStageConfig::default()).is_err());
    }
}
