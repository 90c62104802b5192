//! 드롭 카운터 -- 사유별 드롭 수 집계
//!
//! 한 파이프라인의 스테이지들과 속도 제한기가 같은 [`DropCounter`]를 공유합니다.
//! 프로세스 내 합계를 보관하는 동시에 `metrics` 파사드로도 기록합니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use logweave_core::metrics::{LABEL_REASON, PIPELINE_DROPPED_ENTRIES_TOTAL};

/// 전역 속도 제한기에 의한 드롭 사유
pub const REASON_GLOBAL_RATE_LIMITER: &str = "global_rate_limiter";
/// JSON 스테이지의 형식 오류 드롭 사유
pub const REASON_DROP_MALFORMED: &str = "drop_malformed";
/// limit 스테이지의 드롭 사유
pub const REASON_LIMIT_STAGE: &str = "limit_stage";

/// 사유별 드롭 카운터 (cheap clone)
#[derive(Debug, Clone, Default)]
pub struct DropCounter {
    counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 사유의 드롭 수를 1 증가시킵니다.
    pub fn inc(&self, reason: &str) {
        *self.lock().entry(reason.to_owned()).or_insert(0) += 1;
        metrics::counter!(PIPELINE_DROPPED_ENTRIES_TOTAL, LABEL_REASON => reason.to_owned())
            .increment(1);
    }

    /// 사유의 누적 드롭 수
    pub fn get(&self, reason: &str) -> u64 {
        self.lock().get(reason).copied().unwrap_or(0)
    }

    /// 전체 드롭 수
    pub fn total(&self) -> u64 {
        self.lock().values().sum()
    }

    /// 현재 집계의 사본
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        // 카운터 갱신 중 panic이 나도 집계 자체는 유효하다
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
