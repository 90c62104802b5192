//! 스테이지 설정 -- `[[pipeline.stages]]` 블록의 타입 정의
//!
//! 각 블록은 정확히 하나의 스테이지 종류만 채워야 합니다.
//! [`StageConfig`]는 serde의 externally tagged 표현을 사용하므로
//! 키가 없거나 둘 이상인 블록은 파싱 단계에서 거부됩니다.
//!
//! ```toml
//! [[pipeline.stages]]
//! json = { expressions = { msg = "", stream = "" } }
//!
//! [[pipeline.stages]]
//! labels = { values = { stream = "" } }
//! ```
//!
//! 값의 의미 검증(정규식 컴파일, 필수 필드 등)은 스테이지 생성 시점에 수행됩니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 드롭 스테이지의 기본 드롭 사유
pub const DEFAULT_DROP_REASON: &str = "drop_stage";

/// 메트릭 스테이지의 기본 이름 접두사
pub const DEFAULT_METRIC_PREFIX: &str = "logweave_custom_";

/// 스테이지 설정 (한 블록 = 한 종류)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageConfig {
    Json(JsonStageConfig),
    Logfmt(LogfmtStageConfig),
    Regex(RegexStageConfig),
    Labels(LabelsStageConfig),
    LabelDrop(LabelDropStageConfig),
    LabelKeep(LabelKeepStageConfig),
    StaticLabels(StaticLabelsStageConfig),
    Output(OutputStageConfig),
    Template(TemplateStageConfig),
    Timestamp(TimestampStageConfig),
    Drop(DropStageConfig),
    Limit(LimitStageConfig),
    Metrics(MetricsStageConfig),
    Geoip(GeoIpStageConfig),
    Multiline(MultilineStageConfig),
    Docker(DockerStageConfig),
    Cri(CriStageConfig),
    Decolorize(DecolorizeStageConfig),
}

impl StageConfig {
    /// 설정 파일에서 사용하는 스테이지 종류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Logfmt(_) => "logfmt",
            Self::Regex(_) => "regex",
            Self::Labels(_) => "labels",
            Self::LabelDrop(_) => "label_drop",
            Self::LabelKeep(_) => "label_keep",
            Self::StaticLabels(_) => "static_labels",
            Self::Output(_) => "output",
            Self::Template(_) => "template",
            Self::Timestamp(_) => "timestamp",
            Self::Drop(_) => "drop",
            Self::Limit(_) => "limit",
            Self::Metrics(_) => "metrics",
            Self::Geoip(_) => "geoip",
            Self::Multiline(_) => "multiline",
            Self::Docker(_) => "docker",
            Self::Cri(_) => "cri",
            Self::Decolorize(_) => "decolorize",
        }
    }
}

/// JSON 추출 스테이지
///
/// `expressions`의 키는 추출 맵에 기록할 이름, 값은 JSON 경로입니다.
/// 경로가 비어 있으면 키 자체를 경로로 사용합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JsonStageConfig {
    pub expressions: BTreeMap<String, String>,
    /// 파싱할 추출 맵 키 (없으면 라인)
    pub source: Option<String>,
    /// JSON 객체가 아닌 입력을 드롭할지 여부
    pub drop_malformed: bool,
}

/// logfmt 추출 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogfmtStageConfig {
    /// 추출 맵 키 → logfmt 키 (비어 있으면 같은 이름)
    pub mapping: BTreeMap<String, String>,
    pub source: Option<String>,
}

/// 정규식 추출 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegexStageConfig {
    /// 이름 있는 캡처 그룹을 포함한 정규식
    pub expression: String,
    pub source: Option<String>,
}

/// 레이블 설정 스테이지 (레이블 이름 → 추출 맵 키)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabelsStageConfig {
    pub values: BTreeMap<String, String>,
}

/// 레이블 제거 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabelDropStageConfig {
    pub values: Vec<String>,
}

/// 레이블 허용 목록 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabelKeepStageConfig {
    pub values: Vec<String>,
}

/// 고정 레이블 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticLabelsStageConfig {
    pub values: BTreeMap<String, String>,
}

/// 출력 라인 교체 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputStageConfig {
    pub source: String,
}

/// 템플릿 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateStageConfig {
    /// 렌더링 결과를 기록할 추출 맵 키
    pub source: String,
    pub template: String,
}

/// 타임스탬프 파싱 실패 시 동작
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOnFailure {
    /// 같은 스트림의 마지막 타임스탬프 + 1ns
    #[default]
    Fudge,
    /// 타임스탬프를 그대로 둠
    Skip,
}

/// 타임스탬프 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimestampStageConfig {
    pub source: String,
    /// `RFC3339`, `RFC3339Nano`, `RFC1123Z`, `RFC2822`, `Unix`, `UnixMs`, `UnixUs`, `UnixNs`
    /// 또는 strftime 패턴
    pub format: String,
    pub fallback_formats: Vec<String>,
    /// 고정 오프셋 (`+09:00`), 기본은 UTC
    pub location: Option<String>,
    pub action_on_failure: ActionOnFailure,
}

/// 드롭 스테이지
///
/// 설정된 모든 조건을 만족하는 엔트리만 드롭됩니다 (AND).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropStageConfig {
    pub source: Option<String>,
    /// 정확히 일치해야 하는 값 (`expression`과 함께 쓸 수 없음)
    pub value: Option<String>,
    pub expression: Option<String>,
    /// humantime 기간 문자열 (`"1h"`, `"30s"`)
    pub older_than: Option<String>,
    /// 바이트 길이
    pub longer_than: Option<usize>,
    pub drop_counter_reason: String,
}

impl Default for DropStageConfig {
    fn default() -> Self {
        Self {
            source: None,
            value: None,
            expression: None,
            older_than: None,
            longer_than: None,
            drop_counter_reason: DEFAULT_DROP_REASON.to_owned(),
        }
    }
}

/// 속도 제한 스테이지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitStageConfig {
    /// 초당 허용 엔트리 수
    pub rate: f64,
    pub burst: u32,
    /// true면 토큰이 없을 때 대기하지 않고 드롭
    pub drop: bool,
    /// 이 레이블 값마다 별도의 버킷을 사용
    pub by_label_name: Option<String>,
    pub max_distinct_labels: usize,
}

impl Default for LimitStageConfig {
    fn default() -> Self {
        Self {
            rate: 0.0,
            burst: 0,
            drop: false,
            by_label_name: None,
            max_distinct_labels: 10_000,
        }
    }
}

/// 메트릭 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// 메트릭 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricAction {
    Inc,
    Add,
    Set,
    Dec,
    Sub,
}

/// 단일 메트릭 정의
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_metric_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 카운터 `inc`에서 소스 값이 이 값과 같을 때만 증가
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub action: Option<MetricAction>,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub count_entry_bytes: bool,
    #[serde(default)]
    pub buckets: Vec<f64>,
}

fn default_metric_prefix() -> String {
    DEFAULT_METRIC_PREFIX.to_owned()
}

/// 메트릭 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsStageConfig {
    pub metrics: BTreeMap<String, MetricConfig>,
}

/// GeoIP 데이터베이스 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoIpDbType {
    #[default]
    City,
    Asn,
    Country,
}

/// GeoIP 보강 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeoIpStageConfig {
    /// MaxMind 데이터베이스 파일 경로
    pub db: String,
    /// IP 주소가 담긴 추출 맵 키
    pub source: String,
    pub db_type: GeoIpDbType,
}

/// 멀티라인 결합 스테이지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultilineStageConfig {
    /// 새 블록의 첫 줄을 식별하는 정규식
    pub firstline: String,
    /// humantime 기간 문자열
    pub max_wait_time: String,
    pub max_lines: usize,
}

impl Default for MultilineStageConfig {
    fn default() -> Self {
        Self {
            firstline: String::new(),
            max_wait_time: "3s".to_owned(),
            max_lines: 128,
        }
    }
}

/// Docker JSON 로그 프리셋
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerStageConfig {}

/// CRI 로그 프리셋
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CriStageConfig {
    /// 스트림별로 보관할 partial 라인 최대 개수
    pub max_partial_lines: usize,
    /// partial 라인 최대 크기 (0이면 제한 없음)
    pub max_partial_line_size: usize,
    pub max_partial_line_size_truncate: bool,
}

impl Default for CriStageConfig {
    fn default() -> Self {
        Self {
            max_partial_lines: 100,
            max_partial_line_size: 0,
            max_partial_line_size_truncate: false,
        }
    }
}

/// ANSI 색상 코드 제거 스테이지
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecolorizeStageConfig {}
