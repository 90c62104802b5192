#![doc = include_str!("../README.md")]

pub mod config;
pub mod entry;
pub mod error;
pub mod handler;
pub mod label;
pub mod metrics;
pub mod stage_config;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, LogweaveError, PipelineError};

// 설정
pub use config::{LogPipelineConfig, LogweaveConfig, RateLimitConfig};
pub use stage_config::StageConfig;

// 엔트리
pub use entry::{Entry, LabelSet};

// 핸들러 trait
pub use handler::{BoxFuture, ChannelHandler, EntryHandler};
