//! 처리 중 엔트리 -- 엔트리 + 추출 맵
//!
//! [`ProcessingEntry`]는 파이프라인 내부에서만 존재합니다.
//! 파이프라인 경계를 넘을 때는 [`ProcessingEntry::into_entry`]로 추출 맵을 버립니다.

use std::collections::HashMap;

use logweave_core::Entry;
use serde_json::Value;

/// 추출 맵 (스테이지 간 임시 키/값 저장소)
pub type Extracted = HashMap<String, Value>;

/// 파이프라인 내부 엔트리
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingEntry {
    pub entry: Entry,
    pub extracted: Extracted,
}

impl ProcessingEntry {
    /// 빈 추출 맵으로 감쌉니다.
    pub fn new(entry: Entry) -> Self {
        Self {
            entry,
            extracted: Extracted::new(),
        }
    }

    /// 현재 레이블을 같은 이름의 문자열 값으로 추출 맵에 복사합니다.
    pub fn seed_labels(&mut self) {
        for (name, value) in self.entry.labels.iter() {
            self.extracted
                .insert(name.to_owned(), Value::String(value.to_owned()));
        }
    }

    /// 추출 맵 값을 문자열로 조회합니다.
    pub fn extracted_string(&self, key: &str) -> Option<String> {
        self.extracted.get(key).and_then(value_to_string)
    }

    /// 추출 맵을 버리고 엔트리만 반환합니다.
    pub fn into_entry(self) -> Entry {
        self.entry
    }
}

impl From<Entry> for ProcessingEntry {
    fn from(entry: Entry) -> Self {
        Self::new(entry)
    }
}

/// 추출 값을 문자열로 변환합니다.
///
/// 문자열, 숫자, 불리언만 변환되며 null, 배열, 객체는 `None`입니다.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// 추출 값을 실수로 변환합니다. 숫자 문자열도 허용합니다.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
