//! 로그 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`LogPipelineConfig`](logweave_core::config::LogPipelineConfig)를
//! 기반으로 파이프라인 실행에 필요한 값을 런타임 타입으로 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logweave_core::config::LogweaveConfig;
//! use logweave_log_pipeline::config::PipelineConfig;
//!
//! let core_config = LogweaveConfig::default();
//! let config = PipelineConfig::from_core(&core_config.pipeline);
//! ```

use std::time::Duration;

use logweave_core::config::{DEFAULT_DRAIN_TIMEOUT_SECS, RateLimitConfig};
use logweave_core::stage_config::StageConfig;

use crate::error::LogPipelineError;

/// 로그 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 미들웨어 정지 시 drain 타임아웃
    pub drain_timeout: Duration,
    /// 단계 사이 채널 용량
    pub channel_capacity: usize,
    /// 전역 속도 제한
    pub rate_limit: RateLimitConfig,
    /// 스테이지 목록
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            channel_capacity: 1,
            rate_limit: RateLimitConfig::default(),
            stages: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// core의 `LogPipelineConfig`에서 파이프라인 설정을 생성합니다.
    pub fn from_core(core: &logweave_core::config::LogPipelineConfig) -> Self {
        Self {
            enabled: core.enabled,
            drain_timeout: Duration::from_secs(core.drain_timeout_secs),
            channel_capacity: core.channel_capacity,
            rate_limit: core.rate_limit.clone(),
            stages: core.stages.clone(),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 스테이지 자체의 검증은 [`Pipeline::new`](crate::pipeline::Pipeline::new)에서 수행됩니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        const MAX_CHANNEL_CAPACITY: usize = 65_536;
        const MAX_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

        if self.channel_capacity == 0 || self.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(LogPipelineError::Config {
                field: "channel_capacity".to_owned(),
                reason: format!("must be 1-{}", MAX_CHANNEL_CAPACITY),
            });
        }

        if self.drain_timeout.is_zero() || self.drain_timeout > MAX_DRAIN_TIMEOUT {
            return Err(LogPipelineError::Config {
                field: "drain_timeout".to_owned(),
                reason: format!("must be 1-{} seconds", MAX_DRAIN_TIMEOUT.as_secs()),
            });
        }

        self.rate_limit
            .validate()
            .map_err(|e| LogPipelineError::Config {
                field: "rate_limit".to_owned(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

/// 파이프라인 설정 빌더
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// drain 타임아웃을 설정합니다.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// 채널 용량을 설정합니다.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// 전역 속도 제한을 설정합니다.
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// 스테이지를 하나 추가합니다.
    pub fn stage(mut self, stage: StageConfig) -> Self {
        self.config.stages.push(stage);
        self
    }

    /// 스테이지 목록을 교체합니다.
    pub fn stages(mut self, stages: Vec<StageConfig>) -> Self {
        self.config.stages = stages;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, LogPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
