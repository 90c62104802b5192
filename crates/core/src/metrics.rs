//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()` 등의 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logweave_`
//! - 컴포넌트명: `pipeline_`, `middleware_`, `stage_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! 메트릭 스테이지가 만드는 사용자 정의 메트릭은 설정된 접두사(기본 `logweave_custom_`)를 사용하며
//! 여기에는 포함되지 않습니다.
//!
//! # 사용 예시
//!
//! ```ignore
//! use logweave_core::metrics::{LABEL_REASON, PIPELINE_DROPPED_ENTRIES_TOTAL};
//!
//! metrics::counter!(PIPELINE_DROPPED_ENTRIES_TOTAL, LABEL_REASON => "drop_stage").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 드롭 사유 레이블 키 (drop_stage, global_rate_limiter, drop_malformed, limit_stage)
pub const LABEL_REASON: &str = "reason";

/// 스테이지 종류 레이블 키
pub const LABEL_STAGE: &str = "stage";

/// 버전 레이블 키
pub const LABEL_VERSION: &str = "version";

// ─── Pipeline 메트릭 ────────────────────────────────────────────────

/// Pipeline: 드롭된 엔트리 수 (counter, label: reason)
pub const PIPELINE_DROPPED_ENTRIES_TOTAL: &str = "logweave_pipeline_dropped_entries_total";

/// Pipeline: 파이프라인에 들어온 엔트리 수 (counter)
pub const PIPELINE_ENTRIES_RECEIVED_TOTAL: &str = "logweave_pipeline_entries_received_total";

/// Pipeline: 다음 핸들러로 전달된 엔트리 수 (counter)
pub const PIPELINE_ENTRIES_SENT_TOTAL: &str = "logweave_pipeline_entries_sent_total";

/// Stage: 엔트리 단위 soft failure 수 (counter, label: stage)
pub const STAGE_SOFT_FAILURES_TOTAL: &str = "logweave_stage_soft_failures_total";

// ─── Middleware 메트릭 ──────────────────────────────────────────────

/// Middleware: drain 타임아웃 발생 수 (counter)
pub const MIDDLEWARE_DRAIN_TIMEOUTS_TOTAL: &str = "logweave_middleware_drain_timeouts_total";

/// Middleware: 타임아웃으로 유실된 엔트리 수 (counter)
pub const MIDDLEWARE_ENTRIES_LOST_TOTAL: &str = "logweave_middleware_entries_lost_total";

// ─── Fan-out 메트릭 ─────────────────────────────────────────────────

/// Fan-out: 등록된 수신자 수 (gauge)
pub const FANOUT_RECEIVERS: &str = "logweave_fanout_receivers";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logweave_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logweave-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Pipeline
    describe_counter!(
        PIPELINE_DROPPED_ENTRIES_TOTAL,
        "Total number of entries dropped, by reason"
    );
    describe_counter!(
        PIPELINE_ENTRIES_RECEIVED_TOTAL,
        "Total number of entries that entered a pipeline"
    );
    describe_counter!(
        PIPELINE_ENTRIES_SENT_TOTAL,
        "Total number of entries forwarded by a pipeline to the next handler"
    );
    describe_counter!(
        STAGE_SOFT_FAILURES_TOTAL,
        "Total number of per-entry soft failures, by stage kind"
    );

    // Middleware
    describe_counter!(
        MIDDLEWARE_DRAIN_TIMEOUTS_TOTAL,
        "Number of middleware stops that hit the drain timeout"
    );
    describe_counter!(
        MIDDLEWARE_ENTRIES_LOST_TOTAL,
        "Entries discarded because the drain timeout elapsed"
    );

    // Fan-out
    describe_gauge!(FANOUT_RECEIVERS, "Number of fan-out receivers");

    // Daemon
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        PIPELINE_DROPPED_ENTRIES_TOTAL,
        PIPELINE_ENTRIES_RECEIVED_TOTAL,
        PIPELINE_ENTRIES_SENT_TOTAL,
        STAGE_SOFT_FAILURES_TOTAL,
        MIDDLEWARE_DRAIN_TIMEOUTS_TOTAL,
        MIDDLEWARE_ENTRIES_LOST_TOTAL,
        FANOUT_RECEIVERS,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_logweave_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("logweave_"),
                "Metric '{}' does not start with 'logweave_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES
            .iter()
            .filter(|n| **n != FANOUT_RECEIVERS && **n != DAEMON_BUILD_INFO)
        {
            assert!(name.ends_with("_total"), "Counter '{}' lacks _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 설치되지 않아도 panic하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_REASON, LABEL_STAGE, LABEL_VERSION] {
            assert_eq!(
                label.to_lowercase(),
                label,
                "Label key '{}' should be lowercase",
                label
            );
        }
    }
}
