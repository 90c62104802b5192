//! 타임스탬프 스테이지 -- 추출 값으로 엔트리 타임스탬프를 교체

use std::collections::HashMap;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use logweave_core::stage_config::{ActionOnFailure, TimestampStageConfig};
use tracing::debug;

use super::{Processor, soft_failure};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// fudge 캐시가 기억하는 최대 스트림 수
pub const MAX_FUDGE_CACHE_STREAMS: usize = 10_000;

/// 타임스탬프 형식
#[derive(Debug, Clone, PartialEq, Eq)]
enum Format {
    Rfc3339,
    Rfc2822,
    Unix,
    UnixMs,
    UnixUs,
    UnixNs,
    Strftime(String),
}

impl Format {
    fn parse(name: &str) -> Result<Self, LogPipelineError> {
        let format = match name {
            "RFC3339" | "RFC3339Nano" => Self::Rfc3339,
            "RFC1123Z" | "RFC2822" => Self::Rfc2822,
            "Unix" => Self::Unix,
            "UnixMs" => Self::UnixMs,
            "UnixUs" => Self::UnixUs,
            "UnixNs" => Self::UnixNs,
            "" => return Err(LogPipelineError::stage("timestamp", "format is required")),
            pattern => {
                if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                    return Err(LogPipelineError::stage(
                        "timestamp",
                        format!("invalid strftime pattern '{pattern}'"),
                    ));
                }
                Self::Strftime(pattern.to_owned())
            }
        };
        Ok(format)
    }

    fn apply(&self, input: &str, location: FixedOffset) -> Option<DateTime<Utc>> {
        let input = input.trim();
        match self {
            Self::Rfc3339 => DateTime::parse_from_rfc3339(input)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Self::Rfc2822 => DateTime::parse_from_rfc2822(input)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Self::Unix => parse_unix_seconds(input),
            Self::UnixMs => from_scaled(input, 1_000_000),
            Self::UnixUs => from_scaled(input, 1_000),
            Self::UnixNs => from_scaled(input, 1),
            Self::Strftime(pattern) => {
                if let Ok(t) = DateTime::parse_from_str(input, pattern) {
                    return Some(t.with_timezone(&Utc));
                }
                let naive = NaiveDateTime::parse_from_str(input, pattern).ok()?;
                location
                    .from_local_datetime(&naive)
                    .single()
                    .map(|t| t.with_timezone(&Utc))
            }
        }
    }
}

/// 소수 초를 허용하는 Unix 초
fn parse_unix_seconds(input: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match input.split_once('.') {
        Some((s, f)) => (s, f),
        None => (input, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut digits: String = frac.chars().take(9).collect();
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: u32 = digits.parse().ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// 정수 단위 값을 나노초 배수로 해석합니다.
fn from_scaled(input: &str, nanos_per_unit: i64) -> Option<DateTime<Utc>> {
    let value: i64 = input.parse().ok()?;
    let total = i128::from(value) * i128::from(nanos_per_unit);
    let secs = i64::try_from(total.div_euclid(1_000_000_000)).ok()?;
    let nanos = u32::try_from(total.rem_euclid(1_000_000_000)).ok()?;
    DateTime::from_timestamp(secs, nanos)
}

fn parse_location(location: Option<&str>) -> Result<FixedOffset, LogPipelineError> {
    let utc = FixedOffset::east_opt(0).ok_or_else(|| {
        LogPipelineError::stage("timestamp", "failed to build UTC offset")
    })?;
    match location.map(str::trim) {
        None | Some("") | Some("UTC") | Some("Z") => Ok(utc),
        Some(offset) => offset.parse::<FixedOffset>().map_err(|e| {
            LogPipelineError::stage(
                "timestamp",
                format!("invalid location '{offset}' (expected an offset like +09:00): {e}"),
            )
        }),
    }
}

/// 타임스탬프 스테이지
pub struct TimestampStage {
    source: String,
    formats: Vec<Format>,
    location: FixedOffset,
    action_on_failure: ActionOnFailure,
    last_known: HashMap<String, DateTime<Utc>>,
}

impl TimestampStage {
    pub fn new(config: &TimestampStageConfig) -> Result<Self, LogPipelineError> {
        if config.source.is_empty() {
            return Err(LogPipelineError::stage("timestamp", "source is required"));
        }
        let formats = std::iter::once(&config.format)
            .chain(config.fallback_formats.iter())
            .map(|f| Format::parse(f))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: config.source.clone(),
            formats,
            location: parse_location(config.location.as_deref())?,
            action_on_failure: config.action_on_failure,
            last_known: HashMap::new(),
        })
    }

    fn parse(&self, input: &str) -> Option<DateTime<Utc>> {
        self.formats
            .iter()
            .find_map(|format| format.apply(input, self.location))
    }

    fn remember(&mut self, stream: String, ts: DateTime<Utc>) {
        if self.last_known.len() >= MAX_FUDGE_CACHE_STREAMS && !self.last_known.contains_key(&stream)
        {
            self.last_known.clear();
        }
        self.last_known.insert(stream, ts);
    }
}

impl Processor for TimestampStage {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        let Some(input) = entry.extracted_string(&self.source) else {
            return;
        };

        let stream = entry.entry.labels.fingerprint();
        match self.parse(&input) {
            Some(ts) => {
                entry.entry.timestamp = ts;
                if self.action_on_failure == ActionOnFailure::Fudge {
                    self.remember(stream, ts);
                }
            }
            None => {
                debug!(source = %self.source, value = %input, "failed to parse timestamp");
                soft_failure("timestamp");
                if self.action_on_failure == ActionOnFailure::Fudge {
                    if let Some(last) = self.last_known.get(&stream).copied() {
                        let fudged = last + chrono::Duration::nanoseconds(1);
                        entry.entry.timestamp = fudged;
                        self.remember(stream, fudged);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_util::processing;
    use serde_json::json;

    fn stage(format: &str) -> TimestampStage {
        TimestampStage::new(&TimestampStageConfig {
            source: "time".to_owned(),
            format: format.to_owned(),
            ..Default::default()
        })
        .unwrap()
    }

    fn with_time(value: serde_json::Value) -> ProcessingEntry {
        let mut pe = processing("line", &[("job", "a")]);
        pe.extracted.insert("time".to_owned(), value);
        pe
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_rfc3339_nano() {
        let mut pe = with_time(json!("2020-01-01T00:00:00.123456789Z"));
        stage("RFC3339Nano").process(&mut pe);
        assert_eq!(pe.entry.timestamp, utc("2020-01-01T00:00:00.123456789Z"));
    }

    #[test]
    fn parses_rfc2822() {
        let mut pe = with_time(json!("Wed, 01 Jan 2020 09:00:00 +0900"));
        stage("RFC1123Z").process(&mut pe);
        assert_eq!(pe.entry.timestamp, utc("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn parses_unix_variants() {
        let mut secs = with_time(json!(1_577_836_800));
        stage("Unix").process(&mut secs);
        assert_eq!(secs.entry.timestamp, utc("2020-01-01T00:00:00Z"));

        let mut frac = with_time(json!("1577836800.5"));
        stage("Unix").process(&mut frac);
        assert_eq!(frac.entry.timestamp, utc("2020-01-01T00:00:00.5Z"));

        let mut ms = with_time(json!("1577836800123"));
        stage("UnixMs").process(&mut ms);
        assert_eq!(ms.entry.timestamp, utc("2020-01-01T00:00:00.123Z"));

        let mut ns = with_time(json!("1577836800000000001"));
        stage("UnixNs").process(&mut ns);
        assert_eq!(ns.entry.timestamp, utc("2020-01-01T00:00:00.000000001Z"));
    }

    #[test]
    fn strftime_uses_location_when_no_offset() {
        let mut s = TimestampStage::new(&TimestampStageConfig {
            source: "time".to_owned(),
            format: "%Y-%m-%d %H:%M:%S".to_owned(),
            location: Some("+09:00".to_owned()),
            ..Default::default()
        })
        .unwrap();
        let mut pe = with_time(json!("2020-01-01 09:00:00"));
        s.process(&mut pe);
        assert_eq!(pe.entry.timestamp, utc("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn fallback_formats_are_tried_in_order() {
        let mut s = TimestampStage::new(&TimestampStageConfig {
            source: "time".to_owned(),
            format: "RFC3339".to_owned(),
            fallback_formats: vec!["UnixMs".to_owned()],
            ..Default::default()
        })
        .unwrap();
        let mut pe = with_time(json!("1577836800000"));
        s.process(&mut pe);
        assert_eq!(pe.entry.timestamp, utc("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn fudge_uses_last_timestamp_of_stream() {
        let mut s = stage("RFC3339");
        let mut good = with_time(json!("2020-01-01T00:00:00Z"));
        s.process(&mut good);

        let mut bad = with_time(json!("garbage"));
        s.process(&mut bad);
        assert_eq!(
            bad.entry.timestamp,
            utc("2020-01-01T00:00:00.000000001Z")
        );

        // 다른 스트림은 캐시를 공유하지 않는다
        let mut other = processing("line", &[("job", "b")]);
        other.extracted.insert("time".to_owned(), json!("garbage"));
        let before = other.entry.timestamp;
        s.process(&mut other);
        assert_eq!(other.entry.timestamp, before);
    }

    #[test]
    fn skip_leaves_timestamp() {
        let mut s = TimestampStage::new(&TimestampStageConfig {
            source: "time".to_owned(),
            format: "RFC3339".to_owned(),
            action_on_failure: ActionOnFailure::Skip,
            ..Default::default()
        })
        .unwrap();
        let mut good = with_time(json!("2020-01-01T00:00:00Z"));
        s.process(&mut good);
        let mut bad = with_time(json!("garbage"));
        let before = bad.entry.timestamp;
        s.process(&mut bad);
        assert_eq!(bad.entry.timestamp, before);
    }

    #[test]
    fn missing_source_is_noop() {
        let mut pe = processing("line", &[]);
        let before = pe.entry.timestamp;
        stage("RFC3339").process(&mut pe);
        assert_eq!(pe.entry.timestamp, before);
    }

    #[test]
    fn config_errors() {
        assert!(TimestampStage::new(&TimestampStageConfig::default()).is_err());
        assert!(
            TimestampStage::new(&TimestampStageConfig {
                source: "t".to_owned(),
                format: "RFC3339".to_owned(),
                location: Some("Mars/Olympus".to_owned()),
                ..Default::default()
            })
            .is_err()
        );
    }
}
