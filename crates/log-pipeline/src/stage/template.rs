//! 템플릿 스테이지 -- minijinja 템플릿으로 추출 값을 재작성
//!
//! 템플릿 변수:
//! - 문자열로 변환 가능한 모든 추출 맵 키
//! - `Value`: `source` 키의 현재 값
//! - `Entry`: 현재 라인
//!
//! 렌더링 결과는 `extracted[source]`에 기록되며, 결과가 비어 있으면 키를 삭제합니다.
//!
//! 기본 제공 필터(`lower`, `upper`, `trim`, `replace`, `title` 등) 외에
//! `regex_replace_all`, `trim_prefix`, `trim_suffix`, `hash`, `sha2_hash`를 추가로 제공합니다.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

use logweave_core::stage_config::TemplateStageConfig;
use minijinja::{Environment, Error, ErrorKind};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::{ProcessingEntry, value_to_string};
use crate::error::LogPipelineError;

const TEMPLATE_NAME: &str = "stage";

/// `regex_replace_all` 패턴 캐시 상한
const MAX_CACHED_PATTERNS: usize = 64;

/// 템플릿 스테이지
pub struct TemplateStage {
    source: String,
    env: Environment<'static>,
    regex_cache: Arc<RegexCache>,
}

impl TemplateStage {
    pub fn new(config: &TemplateStageConfig) -> Result<Self, LogPipelineError> {
        if config.source.is_empty() {
            return Err(LogPipelineError::stage("template", "source is required"));
        }
        if config.template.is_empty() {
            return Err(LogPipelineError::stage("template", "template is required"));
        }

        let regex_cache = Arc::new(RegexCache::default());
        let cache = Arc::clone(&regex_cache);

        let mut env = Environment::new();
        env.add_filter(
            "regex_replace_all",
            move |value: String, pattern: String, replacement: String| {
                cache.replace_all(&value, &pattern, &replacement)
            },
        );
        env.add_filter("trim_prefix", trim_prefix);
        env.add_filter("trim_suffix", trim_suffix);
        env.add_filter("hash", fnv_hash);
        env.add_filter("sha2_hash", sha2_hash);
        env.add_template_owned(TEMPLATE_NAME, config.template.clone())?;

        Ok(Self {
            source: config.source.clone(),
            env,
            regex_cache,
        })
    }

    fn render(&self, entry: &ProcessingEntry) -> Result<String, Error> {
        let mut vars: BTreeMap<String, String> = entry
            .extracted
            .iter()
            .filter_map(|(k, v)| value_to_string(v).map(|s| (k.clone(), s)))
            .collect();
        if let Some(value) = entry.extracted_string(&self.source) {
            vars.insert("Value".to_owned(), value);
        }
        vars.insert("Entry".to_owned(), entry.entry.line.clone());

        self.env.get_template(TEMPLATE_NAME)?.render(&vars)
    }
}

impl Processor for TemplateStage {
    fn name(&self) -> &'static str {
        "template"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        match self.render(entry) {
            Ok(rendered) if rendered.is_empty() => {
                entry.extracted.remove(&self.source);
            }
            Ok(rendered) => {
                entry
                    .extracted
                    .insert(self.source.clone(), Value::String(rendered));
            }
            Err(e) => {
                debug!(source = %self.source, error = %e, "template render failed");
                soft_failure("template");
            }
        }
    }
}

/// 컴파일된 패턴 캐시. 템플릿 리터럴 패턴은 한 번만 컴파일됩니다.
#[derive(Default)]
struct RegexCache {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl RegexCache {
    fn get(&self, pattern: &str) -> Result<Regex, Error> {
        let mut compiled = self.compiled.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(re) = compiled.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid regex '{pattern}': {e}"),
            )
        })?;
        // 값에서 온 동적 패턴이 캐시를 키우지 않도록 상한을 둔다
        if compiled.len() < MAX_CACHED_PATTERNS {
            compiled.insert(pattern.to_owned(), re.clone());
        }
        Ok(re)
    }

    fn replace_all(&self, value: &str, pattern: &str, replacement: &str) -> Result<String, Error> {
        Ok(self.get(pattern)?.replace_all(value, replacement).into_owned())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or_default()
    }
}

fn trim_prefix(value: String, prefix: String) -> String {
    match value.strip_prefix(prefix.as_str()) {
        Some(rest) => rest.to_owned(),
        None => value,
    }
}

fn trim_suffix(value: String, suffix: String) -> String {
    match value.strip_suffix(suffix.as_str()) {
        Some(rest) => rest.to_owned(),
        None => value,
    }
}

/// 64비트 FNV-1a(salt + value), 소문자 16진수
fn fnv_hash(value: String, salt: String) -> String {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(salt.as_bytes());
    hasher.write(value.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// SHA-256(salt + value), 소문자 16진수
fn sha2_hash(value: String, salt: String) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
