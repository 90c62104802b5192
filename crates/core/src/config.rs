//! 설정 관리 -- logweave.toml 파싱 및 런타임 설정
//!
//! [`LogweaveConfig`]는 모든 섹션의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGWEAVE_PIPELINE_DRAIN_TIMEOUT_SECS=10` 형식)
//! 3. 설정 파일 (`logweave.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logweave_core::error::LogweaveError> {
//! use logweave_core::config::LogweaveConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogweaveConfig::load("logweave.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogweaveConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogweaveError};
use crate::stage_config::StageConfig;

/// 미들웨어 drain 타임아웃 기본값 (초)
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;

/// logweave 통합 설정
///
/// `logweave.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogweaveConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 메트릭 익스포터 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 로그 파이프라인 설정
    #[serde(default)]
    pub pipeline: LogPipelineConfig,
}

impl LogweaveConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogweaveError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogweaveError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogweaveError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogweaveError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogweaveError> {
        toml::from_str(toml_str).map_err(|e| {
            LogweaveError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGWEAVE_{SECTION}_{FIELD}`
    /// 스테이지 목록은 환경변수로 바꿀 수 없습니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGWEAVE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGWEAVE_GENERAL_LOG_FORMAT");

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGWEAVE_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LOGWEAVE_METRICS_LISTEN_ADDR",
        );

        // Pipeline
        override_bool(&mut self.pipeline.enabled, "LOGWEAVE_PIPELINE_ENABLED");
        override_u64(
            &mut self.pipeline.drain_timeout_secs,
            "LOGWEAVE_PIPELINE_DRAIN_TIMEOUT_SECS",
        );
        override_usize(
            &mut self.pipeline.channel_capacity,
            "LOGWEAVE_PIPELINE_CHANNEL_CAPACITY",
        );

        // Rate limit
        override_bool(
            &mut self.pipeline.rate_limit.enabled,
            "LOGWEAVE_PIPELINE_RATE_LIMIT_ENABLED",
        );
        override_f64(
            &mut self.pipeline.rate_limit.rate,
            "LOGWEAVE_PIPELINE_RATE_LIMIT_RATE",
        );
        override_u32(
            &mut self.pipeline.rate_limit.burst,
            "LOGWEAVE_PIPELINE_RATE_LIMIT_BURST",
        );
        override_bool(
            &mut self.pipeline.rate_limit.drop,
            "LOGWEAVE_PIPELINE_RATE_LIMIT_DROP",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 스테이지별 검증은 파이프라인 생성 시점에 수행됩니다.
    pub fn validate(&self) -> Result<(), LogweaveError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.metrics.enabled && self.metrics.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "metrics.listen_addr".to_owned(),
                reason: format!("'{}' is not a socket address", self.metrics.listen_addr),
            }
            .into());
        }

        if self.pipeline.drain_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.drain_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        self.pipeline.rate_limit.validate()?;

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// Prometheus 익스포터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// HTTP 리스너 주소
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9464".to_owned(),
        }
    }
}

/// 로그 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPipelineConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 미들웨어 정지 시 drain 타임아웃 (초)
    pub drain_timeout_secs: u64,
    /// 단계 사이 채널 용량
    pub channel_capacity: usize,
    /// 전역 속도 제한
    pub rate_limit: RateLimitConfig,
    /// 스테이지 목록 (선언 순서대로 실행)
    pub stages: Vec<StageConfig>,
}

impl Default for LogPipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            channel_capacity: 1,
            rate_limit: RateLimitConfig::default(),
            stages: Vec::new(),
        }
    }
}

/// 전역 속도 제한 설정 (토큰 버킷)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 초당 토큰 보충량
    pub rate: f64,
    /// 버킷 크기
    pub burst: u32,
    /// true면 토큰이 없을 때 드롭, false면 대기
    pub drop: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 1000.0,
            burst: 1000,
            drop: false,
        }
    }
}

impl RateLimitConfig {
    /// 활성화된 경우에만 rate/burst를 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.rate_limit.rate".to_owned(),
                reason: "must be a positive number".to_owned(),
            });
        }
        if self.burst == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.rate_limit.burst".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_f64(target: &mut f64, env_key: &str) {
    override_parsed(target, env_key, "f64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}
