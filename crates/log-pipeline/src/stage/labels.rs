//! 레이블 스테이지 -- set / drop / keep / static
//!
//! 레이블 스테이지는 파이프라인 순서대로 실행되므로
//! "허용 목록 후 추가"와 "추가 후 허용 목록"은 결과가 다릅니다.

use std::collections::{BTreeMap, BTreeSet};

use logweave_core::label::{is_valid_label_value, label_name_error};
use logweave_core::stage_config::{
    LabelDropStageConfig, LabelKeepStageConfig, LabelsStageConfig, StaticLabelsStageConfig,
};
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

fn check_label_names<'a>(
    stage: &'static str,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<(), LogPipelineError> {
    for name in names {
        if let Some(reason) = label_name_error(name) {
            return Err(LogPipelineError::stage(
                stage,
                format!("invalid label name '{name}': {reason}"),
            ));
        }
    }
    Ok(())
}

/// 추출 맵 값으로 레이블을 설정합니다.
pub struct LabelSetStage {
    /// 레이블 이름 → 추출 맵 키
    mapping: Vec<(String, String)>,
}

impl LabelSetStage {
    pub fn new(config: &LabelsStageConfig) -> Result<Self, LogPipelineError> {
        if config.values.is_empty() {
            return Err(LogPipelineError::stage("labels", "values must not be empty"));
        }
        check_label_names("labels", config.values.keys())?;

        let mapping = config
            .values
            .iter()
            .map(|(name, source)| {
                let source = if source.is_empty() { name } else { source };
                (name.clone(), source.clone())
            })
            .collect();
        Ok(Self { mapping })
    }
}

impl Processor for LabelSetStage {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        for (name, source) in &self.mapping {
            let Some(value) = entry.extracted_string(source) else {
                debug!(label = %name, source = %source, "source missing or not a string, skipping label");
                continue;
            };
            if !is_valid_label_value(&value) {
                debug!(label = %name, "extracted value is not a valid label value, skipping");
                soft_failure("labels");
                continue;
            }
            // 이름과 값을 미리 검증했으므로 실패하지 않는다
            if let Err(e) = entry.entry.labels.insert(name.as_str(), value) {
                debug!(error = %e, "failed to set label");
            }
        }
    }
}

/// 지정한 레이블을 제거합니다.
pub struct LabelDropStage {
    names: Vec<String>,
}

impl LabelDropStage {
    pub fn new(config: &LabelDropStageConfig) -> Result<Self, LogPipelineError> {
        if config.values.is_empty() {
            return Err(LogPipelineError::stage("label_drop", "values must not be empty"));
        }
        Ok(Self {
            names: config.values.clone(),
        })
    }
}

impl Processor for LabelDropStage {
    fn name(&self) -> &'static str {
        "label_drop"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        for name in &self.names {
            entry.entry.labels.remove(name);
        }
    }
}

/// 지정한 레이블만 남깁니다.
pub struct LabelKeepStage {
    names: BTreeSet<String>,
}

impl LabelKeepStage {
    pub fn new(config: &LabelKeepStageConfig) -> Result<Self, LogPipelineError> {
        if config.values.is_empty() {
            return Err(LogPipelineError::stage("label_keep", "values must not be empty"));
        }
        Ok(Self {
            names: config.values.iter().cloned().collect(),
        })
    }
}

impl Processor for LabelKeepStage {
    fn name(&self) -> &'static str {
        "label_keep"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        entry
            .entry
            .labels
            .retain(|name, _| self.names.contains(name));
    }
}

/// 설정에 지정된 고정 레이블을 설정합니다.
pub struct StaticLabelsStage {
    values: BTreeMap<String, String>,
}

impl StaticLabelsStage {
    pub fn new(config: &StaticLabelsStageConfig) -> Result<Self, LogPipelineError> {
        if config.values.is_empty() {
            return Err(LogPipelineError::stage("static_labels", "values must not be empty"));
        }
        check_label_names("static_labels", config.values.keys())?;

        let values = config
            .values
            .iter()
            .filter(|(name, value)| {
                let valid = is_valid_label_value(value);
                if !valid {
                    debug!(label = %name, "invalid static label value, skipping");
                }
                valid
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Self { values })
    }
}

impl Processor for StaticLabelsStage {
    fn name(&self) -> &'static str {
        "static_labels"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        for (name, value) in &self.values {
            if let Err(e) = entry.entry.labels.insert(name.as_str(), value.as_str()) {
                debug!(error = %e, "failed to set static label");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_util::processing;
    use serde_json::json;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn label_set_uses_name_as_default_source() {
        let mut stage = LabelSetStage::new(&LabelsStageConfig {
            values: map(&[("stream", ""), ("level", "lvl")]),
        })
        .unwrap();

        let mut pe = processing("line", &[]);
        pe.extracted.insert("stream".to_owned(), json!("stderr"));
        pe.extracted.insert("lvl".to_owned(), json!("warn"));
        stage.process(&mut pe);

        assert_eq!(pe.entry.labels.get("stream"), Some("stderr"));
        assert_eq!(pe.entry.labels.get("level"), Some("warn"));
    }

    #[test]
    fn label_set_converts_numbers_and_skips_unconvertible() {
        let mut stage = LabelSetStage::new(&LabelsStageConfig {
            values: map(&[("status", ""), ("obj", ""), ("empty", ""), ("missing", "")]),
        })
        .unwrap();

        let mut pe = processing("line", &[]);
        pe.extracted.insert("status".to_owned(), json!(200));
        pe.extracted.insert("obj".to_owned(), json!({"a": 1}));
        pe.extracted.insert("empty".to_owned(), json!(""));
        stage.process(&mut pe);

        assert_eq!(pe.entry.labels.get("status"), Some("200"));
        assert!(!pe.entry.labels.contains("obj"));
        assert!(!pe.entry.labels.contains("empty"));
        assert!(!pe.entry.labels.contains("missing"));
    }

    #[test]
    fn label_set_rejects_invalid_names() {
        let err = LabelSetStage::new(&LabelsStageConfig {
            values: map(&[("bad-name", "")]),
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("bad-name"));
    }

    #[test]
    fn empty_lists_are_config_errors() {
        assert!(LabelSetStage::new(&LabelsStageConfig::default()).is_err());
        assert!(LabelDropStage::new(&LabelDropStageConfig::default()).is_err());
        assert!(LabelKeepStage::new(&LabelKeepStageConfig::default()).is_err());
        assert!(StaticLabelsStage::new(&StaticLabelsStageConfig::default()).is_err());
    }

    #[test]
    fn drop_and_keep() {
        let mut pe = processing("line", &[("a", "1"), ("b", "2"), ("c", "3")]);

        LabelDropStage::new(&LabelDropStageConfig {
            values: vec!["a".to_owned()],
        })
        .unwrap()
        .process(&mut pe);
        assert!(!pe.entry.labels.contains("a"));

        LabelKeepStage::new(&LabelKeepStageConfig {
            values: vec!["c".to_owned(), "z".to_owned()],
        })
        .unwrap()
        .process(&mut pe);
        assert_eq!(pe.entry.labels.iter().collect::<Vec<_>>(), vec![("c", "3")]);
    }

    #[test]
    fn keep_with_no_matching_names_yields_empty_set() {
        let mut pe = processing("line", &[("filename", "/x")]);
        LabelKeepStage::new(&LabelKeepStageConfig {
            values: vec!["foo".to_owned()],
        })
        .unwrap()
        .process(&mut pe);
        assert!(pe.entry.labels.is_empty());
    }

    #[test]
    fn static_labels_skip_invalid_values() {
        let mut stage = StaticLabelsStage::new(&StaticLabelsStageConfig {
            values: map(&[("env", "prod"), ("blank", "")]),
        })
        .unwrap();
        let mut pe = processing("line", &[]);
        stage.process(&mut pe);
        assert_eq!(pe.entry.labels.get("env"), Some("prod"));
        assert!(!pe.entry.labels.contains("blank"));
    }

    #[test]
    fn static_labels_do_not_touch_extracted() {
        let mut stage = StaticLabelsStage::new(&StaticLabelsStageConfig {
            values: map(&[("env", "prod")]),
        })
        .unwrap();
        let mut pe = processing("line", &[]);
        stage.process(&mut pe);
        assert!(pe.extracted.get("env").is_none());
    }
}
