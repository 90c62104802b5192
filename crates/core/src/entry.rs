//! 엔트리 모델 -- 시스템을 흐르는 로그 레코드 단위
//!
//! [`Entry`]는 타임스탬프, 레이블 세트, 텍스트 라인으로 구성됩니다.
//! 레이블은 [`LabelSet`]을 통해서만 수정되며, 삽입 시 이름과 값의 유효성을 검사합니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::label::{is_valid_label_value, label_name_error};

/// 레이블 세트
///
/// 이름 기준으로 정렬되어 저장되므로 비교와 지문(fingerprint) 계산이 순서와 무관합니다.
/// `Clone`은 깊은 복사이므로 팬아웃 목적지마다 독립된 사본을 만들 수 있습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// 빈 레이블 세트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// (이름, 값) 쌍 목록에서 레이블 세트를 생성합니다.
    ///
    /// 하나라도 유효하지 않으면 에러를 반환합니다.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.insert(name, value)?;
        }
        Ok(set)
    }

    /// 레이블을 설정합니다. 기존 값이 있으면 반환합니다.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, PipelineError> {
        let name = name.into();
        let value = value.into();
        if let Some(reason) = label_name_error(&name) {
            return Err(PipelineError::InvalidLabel {
                name,
                reason: reason.to_owned(),
            });
        }
        if !is_valid_label_value(&value) {
            return Err(PipelineError::InvalidLabel {
                name,
                reason: format!("invalid value of {} bytes", value.len()),
            });
        }
        Ok(self.0.insert(name, value))
    }

    /// 레이블 값을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// 레이블 존재 여부를 확인합니다.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// 레이블을 제거합니다.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    /// 조건을 만족하는 레이블만 남깁니다.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.0.retain(|k, v| keep(k, v));
    }

    /// 이름 순으로 레이블을 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 스트림 식별용 지문 문자열 (`{a="1", b="2"}` 형식)
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        f.write_str("}")
    }
}

/// 로그 엔트리
///
/// 하나의 로그 레코드를 나타냅니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// 레코드 타임스탬프
    pub timestamp: DateTime<Utc>,
    /// 레이블 세트
    pub labels: LabelSet,
    /// 원본 또는 변환된 텍스트
    pub line: String,
}

impl Entry {
    /// 새 엔트리를 생성합니다.
    pub fn new(timestamp: DateTime<Utc>, labels: LabelSet, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            labels,
            line: line.into(),
        }
    }

    /// 현재 시각을 타임스탬프로 하는 엔트리를 생성합니다.
    pub fn now(labels: LabelSet, line: impl Into<String>) -> Self {
        Self::new(Utc::now(), labels, line)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.to_rfc3339(),
            self.labels,
            self.line
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_validates_name_and_value() {
        let mut labels = LabelSet::new();
        assert!(labels.insert("stream", "stderr").unwrap().is_none());
        assert_eq!(
            labels.insert("stream", "stdout").unwrap(),
            Some("stderr".to_owned())
        );
        assert!(labels.insert("bad-name", "x").is_err());
        assert!(labels.insert("empty", "").is_err());
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = LabelSet::from_pairs([("b", "2"), ("a", "1")]).unwrap();
        let b = LabelSet::from_pairs([("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), r#"{a="1", b="2"}"#);
    }

    #[test]
    fn clone_is_independent() {
        let mut original = LabelSet::from_pairs([("job", "web")]).unwrap();
        let copy = original.clone();
        original.insert("job", "db").unwrap();
        assert_eq!(copy.get("job"), Some("web"));
        assert_eq!(original.get("job"), Some("db"));
    }

    #[test]
    fn retain_and_remove() {
        let mut labels = LabelSet::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]).unwrap();
        labels.retain(|name, _| name != "b");
        assert!(!labels.contains("b"));
        assert_eq!(labels.remove("a"), Some("1".to_owned()));
        assert_eq!(labels.iter().collect::<Vec<_>>(), vec![("c", "3")]);
    }

    #[test]
    fn entry_display_contains_line() {
        let entry = Entry::now(LabelSet::new(), "hello");
        assert!(entry.to_string().ends_with("{} hello"));
    }
}
