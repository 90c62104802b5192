//! 전역 엔트리 속도 제한기
//!
//! [`EntryRateLimiter`]는 프로세스 전역 변수가 아니라 `Arc`로 주입되는 값입니다.
//! 같은 인스턴스를 여러 파이프라인 핸들러에 넘기면 하나의 토큰 버킷을 공유합니다.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use logweave_core::config::RateLimitConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::counter::{DropCounter, REASON_GLOBAL_RATE_LIMITER};
use crate::error::LogPipelineError;

/// 초당 `rate`개, 최대 `burst`개의 토큰 버킷 할당량
///
/// `rate`가 양의 유한수가 아니거나 `burst`가 0이면 `None`.
pub(crate) fn quota(rate: f64, burst: u32) -> Option<Quota> {
    if !(rate.is_finite() && rate > 0.0) {
        return None;
    }
    let burst = NonZeroU32::new(burst)?;
    let period = Duration::try_from_secs_f64(1.0 / rate).ok()?;
    Quota::with_period(period).map(|q| q.allow_burst(burst))
}

/// 전역 엔트리 속도 제한기
pub struct EntryRateLimiter {
    limiter: DefaultDirectRateLimiter,
    drop: bool,
}

impl std::fmt::Debug for EntryRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRateLimiter")
            .field("drop", &self.drop)
            .finish_non_exhaustive()
    }
}

impl EntryRateLimiter {
    /// 설정으로 제한기를 생성합니다. `enabled` 값은 보지 않습니다.
    pub fn new(config: &RateLimitConfig) -> Result<Self, LogPipelineError> {
        let quota = quota(config.rate, config.burst).ok_or_else(|| LogPipelineError::Config {
            field: "rate_limit".to_owned(),
            reason: format!(
                "rate must be positive and burst non-zero (rate={}, burst={})",
                config.rate, config.burst
            ),
        })?;
        Ok(Self {
            limiter: RateLimiter::direct(quota),
            drop: config.drop,
        })
    }

    /// 활성화된 경우에만 제한기를 생성합니다.
    pub fn from_config(config: &RateLimitConfig) -> Result<Option<Self>, LogPipelineError> {
        if !config.enabled {
            return Ok(None);
        }
        Self::new(config).map(Some)
    }

    /// 드롭 모드 여부
    pub fn is_drop_mode(&self) -> bool {
        self.drop
    }

    /// 엔트리 하나를 통과시킬지 결정합니다.
    ///
    /// - 드롭 모드: 토큰이 없으면 `global_rate_limiter` 사유로 집계하고 `false`
    /// - 대기 모드: 토큰이 생길 때까지 대기하며, 취소되면 `false`
    pub async fn admit(&self, counter: &DropCounter, cancel: &CancellationToken) -> bool {
        if self.drop {
            if self.limiter.check().is_ok() {
                return true;
            }
            debug!("entry dropped by global rate limiter");
            counter.inc(REASON_GLOBAL_RATE_LIMITER);
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.limiter.until_ready() => true,
        }
    }
}
