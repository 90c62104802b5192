//! limit 스테이지 -- 스테이지 단위 토큰 버킷
//!
//! `by_label_name`이 지정되면 그 레이블 값마다 별도 버킷을 사용하며,
//! 해당 레이블이 없는 엔트리는 제한 없이 통과합니다.

use std::collections::{HashMap, VecDeque};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use logweave_core::stage_config::LimitStageConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RunContext, Stage, StageContext, forward, recv};
use crate::counter::{DropCounter, REASON_LIMIT_STAGE};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;
use crate::ratelimit::quota;

/// 레이블 값별 버킷 (삽입 순서로 오래된 것부터 제거)
struct KeyedBuckets {
    label: String,
    max: usize,
    buckets: HashMap<String, DefaultDirectRateLimiter>,
    order: VecDeque<String>,
}

impl KeyedBuckets {
    fn bucket(&mut self, key: &str, quota: Quota) -> &DefaultDirectRateLimiter {
        if !self.buckets.contains_key(key) {
            while self.buckets.len() >= self.max {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.buckets.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(key.to_owned());
            self.buckets
                .insert(key.to_owned(), RateLimiter::direct(quota));
        }
        &self.buckets[key]
    }
}

/// limit 스테이지
pub struct LimitStage {
    quota: Quota,
    drop: bool,
    single: DefaultDirectRateLimiter,
    keyed: Option<KeyedBuckets>,
    counter: DropCounter,
}

impl LimitStage {
    pub fn new(config: &LimitStageConfig, ctx: &StageContext) -> Result<Self, LogPipelineError> {
        let quota = quota(config.rate, config.burst).ok_or_else(|| {
            LogPipelineError::stage("limit", "rate must be positive and burst non-zero")
        })?;
        let keyed = match &config.by_label_name {
            Some(label) if label.is_empty() => {
                return Err(LogPipelineError::stage("limit", "by_label_name must not be empty"));
            }
            Some(label) => {
                if config.max_distinct_labels == 0 {
                    return Err(LogPipelineError::stage(
                        "limit",
                        "max_distinct_labels must be greater than 0",
                    ));
                }
                Some(KeyedBuckets {
                    label: label.clone(),
                    max: config.max_distinct_labels,
                    buckets: HashMap::new(),
                    order: VecDeque::new(),
                })
            }
            None => None,
        };

        Ok(Self {
            quota,
            drop: config.drop,
            single: RateLimiter::direct(quota),
            keyed,
            counter: ctx.drop_counter.clone(),
        })
    }

    /// 엔트리를 통과시킬지 결정합니다. 대기 중 취소되면 `false`.
    async fn admit(&mut self, entry: &ProcessingEntry, cancel: &CancellationToken) -> bool {
        let quota = self.quota;
        let limiter = match &mut self.keyed {
            Some(keyed) => {
                let Some(value) = entry.entry.labels.get(&keyed.label).map(str::to_owned) else {
                    return true;
                };
                keyed.bucket(&value, quota)
            }
            None => &self.single,
        };

        if self.drop {
            if limiter.check().is_ok() {
                return true;
            }
            debug!("entry dropped by limit stage");
            self.counter.inc(REASON_LIMIT_STAGE);
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = limiter.until_ready() => true,
        }
    }
}

impl Stage for LimitStage {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn run(
        self: Box<Self>,
        mut input: mpsc::Receiver<ProcessingEntry>,
        ctx: RunContext,
    ) -> mpsc::Receiver<ProcessingEntry> {
        let (tx, rx) = ctx.channel();
        let mut stage = *self;
        tokio::spawn(async move {
            while let Some(entry) = recv(&mut input, &ctx.cancel).await {
                if !stage.admit(&entry, &ctx.cancel).await {
                    if ctx.cancel.is_cancelled() {
                        break;
                    }
                    continue;
                }
                if !forward(&tx, entry, &ctx.cancel).await {
                    break;
                }
            }
        });
        rx
    }
}
