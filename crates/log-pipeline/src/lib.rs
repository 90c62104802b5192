#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`entry`]: 처리 중 엔트리와 추출 맵
//! - [`middleware`]: drain 타임아웃이 있는 엔트리 변환 미들웨어
//! - [`stage`]: 스테이지 trait, map/filter 헬퍼, 구체 스테이지들
//! - [`pipeline`]: 스테이지 합성, 핸들러 래핑
//! - [`ratelimit`]: 주입형 전역 속도 제한기
//! - [`fanout`]: 다중 목적지 복제
//! - [`counter`]: 사유별 드롭 카운터
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! source -> PipelineHandler -> seed -> stage1 -> ... -> stageN -> rate limit -> FanoutHandler
//!                                                                                 |  |  |
//!                                                                              sink sink sink
//! ```

pub mod config;
pub mod counter;
pub mod entry;
pub mod error;
pub mod fanout;
pub mod middleware;
pub mod pipeline;
pub mod ratelimit;
pub mod stage;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{Pipeline, PipelineHandler};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::LogPipelineError;

// 엔트리
pub use entry::{Extracted, ProcessingEntry};

// 스테이지
pub use stage::{
    Filter, FilterStage, MapStage, Processor, RunContext, Stage, StageContext, build_stage,
};

// 미들웨어, 속도 제한, 팬아웃
pub use counter::DropCounter;
pub use fanout::{Fanout, FanoutHandler};
pub use middleware::{DEFAULT_DRAIN_TIMEOUT, EntryMutatorHandler};
pub use ratelimit::EntryRateLimiter;
