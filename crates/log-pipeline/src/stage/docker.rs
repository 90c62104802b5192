//! Docker JSON 로그 프리셋
//!
//! `{"log":"...","stream":"stdout","time":"..."}` 형식의 라인을 해석하는 중첩 파이프라인입니다.

use logweave_core::stage_config::{
    JsonStageConfig, LabelsStageConfig, OutputStageConfig, TimestampStageConfig,
};

use super::json::JsonStage;
use super::labels::LabelSetStage;
use super::output::OutputStage;
use super::timestamp::TimestampStage;
use super::{FilterStage, MapStage, Stage, StageContext};
use crate::error::LogPipelineError;
use crate::pipeline::Pipeline;

/// Docker 프리셋 파이프라인을 생성합니다.
pub fn pipeline(ctx: &StageContext) -> Result<Pipeline, LogPipelineError> {
    let expressions = [("output", "log"), ("stream", "stream"), ("timestamp", "time")]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(FilterStage(JsonStage::new(
            &JsonStageConfig {
                expressions,
                ..Default::default()
            },
            ctx,
        )?)),
        Box::new(MapStage(LabelSetStage::new(&LabelsStageConfig {
            values: [("stream".to_owned(), String::new())].into_iter().collect(),
        })?)),
        Box::new(MapStage(TimestampStage::new(&TimestampStageConfig {
            source: "timestamp".to_owned(),
            format: "RFC3339Nano".to_owned(),
            ..Default::default()
        })?)),
        Box::new(MapStage(OutputStage::new(&OutputStageConfig {
            source: "output".to_owned(),
        })?)),
    ];
    Ok(Pipeline::from_stages(stages, ctx.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_util::{processing, run_stage};

    #[tokio::test]
    async fn parses_docker_json_lines() {
        let stage = pipeline(&StageContext::default()).unwrap();
        let inputs = vec![
            processing(
                r#"{"log":"hello\n","stream":"stderr","time":"2019-04-30T02:12:41.8443515Z"}"#,
                &[("job", "docker")],
            ),
            processing("not json", &[("job", "docker")]),
        ];
        let out = run_stage(Box::new(stage), inputs).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].entry.line, "hello\n");
        assert_eq!(out[0].entry.labels.get("stream"), Some("stderr"));
        assert_eq!(out[0].entry.labels.get("job"), Some("docker"));
        assert_eq!(out[0].entry.timestamp.timestamp(), 1_556_590_361);
        // 해석할 수 없는 라인은 그대로 통과한다
        assert_eq!(out[1].entry.line, "not json");
        assert!(out[1].entry.labels.get("stream").is_none());
    }
}
