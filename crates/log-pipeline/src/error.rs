//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 파이프라인 구성과 실행 중 발생하는 에러를 표현합니다.
//! 엔트리 단위의 soft failure는 에러로 전파되지 않고 debug 로그로만 남습니다.
//! `From<LogPipelineError> for LogweaveError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use logweave_core::error::{ConfigError, LogweaveError, PipelineError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 파이프라인 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 스테이지 설정 에러 (파이프라인 생성 중단)
    #[error("invalid {stage} stage: {reason}")]
    StageConfig {
        /// 스테이지 종류
        stage: &'static str,
        /// 에러 사유
        reason: String,
    },

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// 템플릿 컴파일 에러
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// GeoIP 데이터베이스 에러
    #[error("geoip error: {0}")]
    GeoIp(String),
}

impl LogPipelineError {
    /// 스테이지 설정 에러를 생성합니다.
    pub(crate) fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::StageConfig {
            stage,
            reason: reason.into(),
        }
    }
}

impl From<LogPipelineError> for LogweaveError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Config { field, reason } => {
                LogweaveError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => LogweaveError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
