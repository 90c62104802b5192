//! 메트릭 스테이지 -- 엔트리에서 사용자 정의 메트릭 생성
//!
//! 모든 메트릭은 `metrics` 파사드로 기록되며, 엔트리의 현재 레이블이 메트릭 레이블이 됩니다.
//! 같은 이름을 여러 번 등록해도 파사드가 같은 수집기를 재사용합니다.
//!
//! 히스토그램 버킷은 익스포터 설정 시점에 정해지므로 [`histogram_buckets`]로 모아
//! 익스포터 빌더에 전달합니다.

use logweave_core::stage_config::{
    MetricAction, MetricConfig, MetricType, MetricsStageConfig, StageConfig,
};
use metrics::Label;
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::{ProcessingEntry, value_to_f64};
use crate::error::LogPipelineError;

/// 메트릭 한 건의 갱신 내용
#[derive(Debug, Clone, Copy, PartialEq)]
enum Update {
    CounterAdd(u64),
    GaugeSet(f64),
    GaugeInc(f64),
    GaugeDec(f64),
    Observe(f64),
}

/// 검증된 메트릭 정의
#[derive(Debug, Clone)]
struct Metric {
    name: String,
    kind: MetricType,
    action: MetricAction,
    source: Option<String>,
    value: Option<String>,
    match_all: bool,
    count_entry_bytes: bool,
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl Metric {
    fn from_config(key: &str, config: &MetricConfig) -> Result<Self, LogPipelineError> {
        let name = format!("{}{}", config.prefix, key);
        if !is_valid_metric_name(&name) {
            return Err(LogPipelineError::stage(
                "metrics",
                format!("invalid metric name '{name}'"),
            ));
        }
        let err = |reason: &str| LogPipelineError::stage("metrics", format!("{name}: {reason}"));

        let action = match (config.metric_type, config.action) {
            (MetricType::Counter, Some(a @ (MetricAction::Inc | MetricAction::Add))) => a,
            (MetricType::Counter, _) => return Err(err("counter action must be inc or add")),
            (MetricType::Gauge, Some(a)) => a,
            (MetricType::Gauge, None) => return Err(err("gauge action is required")),
            (MetricType::Histogram, _) => MetricAction::Add,
        };

        if config.source.is_none() && !config.match_all {
            return Err(err("source is required unless match_all is set"));
        }
        if config.match_all && config.metric_type != MetricType::Counter {
            return Err(err("match_all is only supported for counters"));
        }
        if config.count_entry_bytes && action != MetricAction::Add {
            return Err(err("count_entry_bytes requires action add"));
        }
        if config.match_all && action == MetricAction::Add && !config.count_entry_bytes {
            return Err(err("match_all with action add requires count_entry_bytes"));
        }
        if !config.buckets.windows(2).all(|w| w[0] < w[1]) {
            return Err(err("buckets must be strictly increasing"));
        }

        if let Some(description) = &config.description {
            match config.metric_type {
                MetricType::Counter => metrics::describe_counter!(name.clone(), description.clone()),
                MetricType::Gauge => metrics::describe_gauge!(name.clone(), description.clone()),
                MetricType::Histogram => {
                    metrics::describe_histogram!(name.clone(), description.clone())
                }
            }
        }

        Ok(Self {
            name,
            kind: config.metric_type,
            action,
            source: config.source.clone(),
            value: config.value.clone(),
            match_all: config.match_all,
            count_entry_bytes: config.count_entry_bytes,
        })
    }

    /// 엔트리에 대한 갱신 내용을 계산합니다. 갱신하지 않으면 `None`.
    fn evaluate(&self, entry: &ProcessingEntry) -> Option<Update> {
        let raw = self.source.as_ref().and_then(|s| entry.extracted.get(s));
        if raw.is_none() && !self.match_all {
            return None;
        }
        if let Some(expected) = &self.value {
            let actual = raw.and_then(crate::entry::value_to_string)?;
            if &actual != expected {
                return None;
            }
        }
        let numeric = || {
            let v = raw.and_then(value_to_f64);
            if v.is_none() {
                debug!(metric = %self.name, "metric source is not numeric");
                soft_failure("metrics");
            }
            v
        };

        let update = match (self.kind, self.action) {
            (MetricType::Counter, MetricAction::Inc) => Update::CounterAdd(1),
            (MetricType::Counter, _) if self.count_entry_bytes => {
                Update::CounterAdd(entry.entry.line.len() as u64)
            }
            (MetricType::Counter, _) => {
                let v = numeric()?;
                if !(v.is_finite() && v >= 0.0) {
                    debug!(metric = %self.name, value = v, "counter cannot decrease");
                    soft_failure("metrics");
                    return None;
                }
                // 카운터는 정수만 누적한다
                Update::CounterAdd(v as u64)
            }
            (MetricType::Gauge, MetricAction::Inc) => Update::GaugeInc(1.0),
            (MetricType::Gauge, MetricAction::Dec) => Update::GaugeDec(1.0),
            (MetricType::Gauge, MetricAction::Set) => Update::GaugeSet(numeric()?),
            (MetricType::Gauge, MetricAction::Add) => Update::GaugeInc(numeric()?),
            (MetricType::Gauge, MetricAction::Sub) => Update::GaugeDec(numeric()?),
            (MetricType::Histogram, _) => Update::Observe(numeric()?),
        };
        Some(update)
    }

    fn apply(&self, update: Update, labels: Vec<Label>) {
        let name = self.name.clone();
        match update {
            Update::CounterAdd(n) => metrics::counter!(name, labels).increment(n),
            Update::GaugeSet(v) => metrics::gauge!(name, labels).set(v),
            Update::GaugeInc(v) => metrics::gauge!(name, labels).increment(v),
            Update::GaugeDec(v) => metrics::gauge!(name, labels).decrement(v),
            Update::Observe(v) => metrics::histogram!(name, labels).record(v),
        }
    }
}

/// 메트릭 스테이지
pub struct MetricsStage {
    metrics: Vec<Metric>,
}

impl MetricsStage {
    pub fn new(config: &MetricsStageConfig) -> Result<Self, LogPipelineError> {
        if config.metrics.is_empty() {
            return Err(LogPipelineError::stage("metrics", "metrics must not be empty"));
        }
        let metrics = config
            .metrics
            .iter()
            .map(|(key, metric)| Metric::from_config(key, metric))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { metrics })
    }
}

impl Processor for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        for metric in &self.metrics {
            if let Some(update) = metric.evaluate(entry) {
                let labels = entry
                    .entry
                    .labels
                    .iter()
                    .map(|(k, v)| Label::new(k.to_owned(), v.to_owned()))
                    .collect();
                metric.apply(update, labels);
            }
        }
    }
}

/// 스테이지 목록에서 버킷이 지정된 히스토그램을 `(메트릭 이름, 버킷)`으로 모읍니다.
///
/// docker/cri 프리셋은 메트릭 스테이지를 포함하지 않으므로 최상위 목록만 봅니다.
pub fn histogram_buckets(stages: &[StageConfig]) -> Vec<(String, Vec<f64>)> {
    stages
        .iter()
        .filter_map(|stage| match stage {
            StageConfig::Metrics(c) => Some(c),
            _ => None,
        })
        .flat_map(|c| c.metrics.iter())
        .filter(|(_, m)| m.metric_type == MetricType::Histogram && !m.buckets.is_empty())
        .map(|(key, m)| (format!("{}{}", m.prefix, key), m.buckets.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_util::processing;
    use logweave_core::stage_config::DEFAULT_METRIC_PREFIX;
    use serde_json::json;

    fn metric(kind: MetricType, action: Option<MetricAction>) -> MetricConfig {
        MetricConfig {
            metric_type: kind,
            source: Some("v".to_owned()),
            prefix: DEFAULT_METRIC_PREFIX.to_owned(),
            description: None,
            value: None,
            action,
            match_all: false,
            count_entry_bytes: false,
            buckets: Vec::new(),
        }
    }

    fn with_v(value: serde_json::Value) -> ProcessingEntry {
        let mut pe = processing("hello", &[("job", "a")]);
        pe.extracted.insert("v".to_owned(), value);
        pe
    }

    #[test]
    fn counter_inc_requires_source_and_matching_value() {
        let mut config = metric(MetricType::Counter, Some(MetricAction::Inc));
        config.value = Some("error".to_owned());
        let m = Metric::from_config("errors", &config).unwrap();

        assert_eq!(m.name, "logweave_custom_errors");
        assert_eq!(m.evaluate(&with_v(json!("error"))), Some(Update::CounterAdd(1)));
        assert_eq!(m.evaluate(&with_v(json!("info"))), None);
        assert_eq!(m.evaluate(&processing("x", &[])), None);
    }

    #[test]
    fn counter_match_all_and_entry_bytes() {
        let mut inc = metric(MetricType::Counter, Some(MetricAction::Inc));
        inc.source = None;
        inc.match_all = true;
        let m = Metric::from_config("lines", &inc).unwrap();
        assert_eq!(m.evaluate(&processing("x", &[])), Some(Update::CounterAdd(1)));

        let mut bytes = metric(MetricType::Counter, Some(MetricAction::Add));
        bytes.source = None;
        bytes.match_all = true;
        bytes.count_entry_bytes = true;
        let m = Metric::from_config("bytes", &bytes).unwrap();
        assert_eq!(m.evaluate(&processing("hello", &[])), Some(Update::CounterAdd(5)));
    }

    #[test]
    fn counter_add_uses_numeric_source() {
        let m = Metric::from_config(
            "sum",
            &metric(MetricType::Counter, Some(MetricAction::Add)),
        )
        .unwrap();
        assert_eq!(m.evaluate(&with_v(json!("42"))), Some(Update::CounterAdd(42)));
        assert_eq!(m.evaluate(&with_v(json!(-1))), None);
        assert_eq!(m.evaluate(&with_v(json!("abc"))), None);
    }

    #[test]
    fn gauge_actions() {
        let cases = [
            (MetricAction::Set, Update::GaugeSet(2.5)),
            (MetricAction::Add, Update::GaugeInc(2.5)),
            (MetricAction::Sub, Update::GaugeDec(2.5)),
            (MetricAction::Inc, Update::GaugeInc(1.0)),
            (MetricAction::Dec, Update::GaugeDec(1.0)),
        ];
        for (action, expected) in cases {
            let m = Metric::from_config("g", &metric(MetricType::Gauge, Some(action))).unwrap();
            assert_eq!(m.evaluate(&with_v(json!(2.5))), Some(expected), "{action:?}");
        }
    }

    #[test]
    fn histogram_observes_numeric_source() {
        let m = Metric::from_config("latency", &metric(MetricType::Histogram, None)).unwrap();
        assert_eq!(m.evaluate(&with_v(json!("0.25"))), Some(Update::Observe(0.25)));
        assert_eq!(m.evaluate(&with_v(json!("slow"))), None);
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let bad = [
            metric(MetricType::Counter, Some(MetricAction::Set)),
            metric(MetricType::Counter, None),
            metric(MetricType::Gauge, None),
            MetricConfig {
                source: None,
                ..metric(MetricType::Gauge, Some(MetricAction::Inc))
            },
            MetricConfig {
                buckets: vec![1.0, 0.5],
                ..metric(MetricType::Histogram, None)
            },
            MetricConfig {
                count_entry_bytes: true,
                ..metric(MetricType::Counter, Some(MetricAction::Inc))
            },
        ];
        for config in &bad {
            assert!(Metric::from_config("m", config).is_err(), "{config:?}");
        }
        assert!(
            Metric::from_config("bad-name", &metric(MetricType::Histogram, None)).is_err()
        );
        assert!(MetricsStage::new(&MetricsStageConfig::default()).is_err());
    }

    #[test]
    fn process_without_recorder_is_noop() {
        let mut config = MetricsStageConfig::default();
        config.metrics.insert(
            "hits".to_owned(),
            metric(MetricType::Counter, Some(MetricAction::Inc)),
        );
        let mut stage = MetricsStage::new(&config).unwrap();
        let mut pe = with_v(json!("x"));
        let before = pe.clone();
        stage.process(&mut pe);
        assert_eq!(pe, before);
    }

    #[test]
    fn collects_histogram_buckets() {
        let mut config = MetricsStageConfig::default();
        config.metrics.insert(
            "latency".to_owned(),
            MetricConfig {
                buckets: vec![0.1, 1.0],
                ..metric(MetricType::Histogram, None)
            },
        );
        config.metrics.insert(
            "hits".to_owned(),
            metric(MetricType::Counter, Some(MetricAction::Inc)),
        );
        let found = histogram_buckets(&[StageConfig::Metrics(config)]);
        assert_eq!(
            found,
            vec![("logweave_custom_latency".to_owned(), vec![0.1, 1.0])]
        );
    }
}
