//! Structural validation of the aggregated run document.
//!
//! The typed model already enforces field names and enum values at decode
//! time; this pass checks the cross-field invariants serde cannot express.
//! Validation always runs before a run document is published.

use litani_core::model::{JobRecord, Outcome, Pipeline, Run, RunStatus, Stage};
use litani_core::time;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("pipeline '{pipeline}' stages {actual:?} do not follow the run's stages {expected:?}")]
    StageOrder {
        pipeline: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("stage '{stage}' of pipeline '{pipeline}' has progress {progress}, expected 0..=100")]
    ProgressRange {
        pipeline: String,
        stage: String,
        progress: u8,
    },
    #[error("stage '{stage}' of pipeline '{pipeline}' reports {actual:?} but its jobs imply {expected:?}")]
    StageStatus {
        pipeline: String,
        stage: String,
        expected: Outcome,
        actual: Outcome,
    },
    #[error("pipeline '{pipeline}' reports {actual:?} but its stages imply {expected:?}")]
    PipelineStatus {
        pipeline: String,
        expected: RunStatus,
        actual: RunStatus,
    },
    #[error("run reports {actual:?} but its pipelines imply {expected:?}")]
    RunStatus {
        expected: RunStatus,
        actual: RunStatus,
    },
    #[error("job '{job_id}' is complete but missing field '{field}'")]
    IncompleteRecord { job_id: String, field: &'static str },
    #[error("job '{job_id}' has wrapper return code {actual}, expected {expected}")]
    WrapperReturnCode {
        job_id: String,
        expected: i32,
        actual: i32,
    },
    #[error("malformed timestamp '{stamp}' in {context}")]
    Timestamp { stamp: String, context: String },
}

pub fn validate_run(run: &Run) -> Result<(), SchemaError> {
    check_time(&run.fields.start_time, "run start_time")?;
    if let Some(end) = &run.fields.end_time {
        check_time(end, "run end_time")?;
    }
    for sample in run.fields.parallelism.trace.iter().flatten() {
        if time::parse_ms(&sample.time).is_none() {
            return Err(SchemaError::Timestamp {
                stamp: sample.time.clone(),
                context: "parallelism trace".to_string(),
            });
        }
    }

    let mut expected_run = RunStatus::Success;
    for pipeline in &run.pipelines {
        let status = validate_pipeline(run, pipeline)?;
        expected_run = match (expected_run, status) {
            (_, RunStatus::Fail) | (RunStatus::Fail, _) => RunStatus::Fail,
            (_, RunStatus::InProgress) | (RunStatus::InProgress, _) => RunStatus::InProgress,
            _ => RunStatus::Success,
        };
    }
    if run.fields.status != expected_run {
        return Err(SchemaError::RunStatus {
            expected: expected_run,
            actual: run.fields.status,
        });
    }
    Ok(())
}

fn validate_pipeline(run: &Run, pipeline: &Pipeline) -> Result<RunStatus, SchemaError> {
    let actual: Vec<String> = pipeline.ci_stages.iter().map(|s| s.name.clone()).collect();
    if actual != run.fields.stages {
        return Err(SchemaError::StageOrder {
            pipeline: pipeline.name.clone(),
            expected: run.fields.stages.clone(),
            actual,
        });
    }

    let mut expected = if pipeline.ci_stages.iter().all(|s| s.complete) {
        RunStatus::Success
    } else {
        RunStatus::InProgress
    };
    for stage in &pipeline.ci_stages {
        validate_stage(&pipeline.name, stage)?;
        if matches!(stage.status, Outcome::Fail | Outcome::FailIgnored) {
            expected = RunStatus::Fail;
        }
    }

    if pipeline.status != expected {
        return Err(SchemaError::PipelineStatus {
            pipeline: pipeline.name.clone(),
            expected,
            actual: pipeline.status,
        });
    }
    Ok(expected)
}

fn validate_stage(pipeline: &str, stage: &Stage) -> Result<(), SchemaError> {
    if stage.progress > 100 {
        return Err(SchemaError::ProgressRange {
            pipeline: pipeline.to_string(),
            stage: stage.name.clone(),
            progress: stage.progress,
        });
    }

    let mut expected = Outcome::Success;
    for job in stage.jobs.iter().filter(|j| j.complete) {
        validate_job(job)?;
        match job.outcome {
            Some(Outcome::Fail) => expected = Outcome::Fail,
            Some(Outcome::FailIgnored) if expected == Outcome::Success => {
                expected = Outcome::FailIgnored
            }
            _ => {}
        }
    }
    if stage.status != expected {
        return Err(SchemaError::StageStatus {
            pipeline: pipeline.to_string(),
            stage: stage.name.clone(),
            expected,
            actual: stage.status,
        });
    }
    Ok(())
}

fn validate_job(job: &JobRecord) -> Result<(), SchemaError> {
    let job_id = &job.wrapper_arguments.job_id;
    let require = |present: bool, field: &'static str| {
        if present {
            Ok(())
        } else {
            Err(SchemaError::IncompleteRecord {
                job_id: job_id.clone(),
                field,
            })
        }
    };
    require(job.outcome.is_some(), "outcome")?;
    require(job.start_time.is_some(), "start_time")?;
    require(job.end_time.is_some(), "end_time")?;
    require(job.command_return_code.is_some(), "command_return_code")?;
    require(job.wrapper_return_code.is_some(), "wrapper_return_code")?;
    require(job.timeout_reached.is_some(), "timeout_reached")?;

    for (stamp, context) in [
        (job.start_time.as_deref(), "job start_time"),
        (job.end_time.as_deref(), "job end_time"),
    ] {
        if let Some(stamp) = stamp {
            check_time(stamp, context)?;
        }
    }

    let expected = if job.outcome == Some(Outcome::Fail) { 1 } else { 0 };
    if let Some(actual) = job.wrapper_return_code {
        if actual != expected {
            return Err(SchemaError::WrapperReturnCode {
                job_id: job_id.clone(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

fn check_time(stamp: &str, context: &str) -> Result<(), SchemaError> {
    if time::parse(stamp).is_none() {
        return Err(SchemaError::Timestamp {
            stamp: stamp.to_string(),
            context: context.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_run(status: &str, pipelines: serde_json::Value) -> Run {
        serde_json::from_value(serde_json::json!({
            "run_id": "run",
            "project": "proj",
            "stages": ["build"],
            "pools": {},
            "start_time": "2026-03-01T09:00:00Z",
            "version": "1.15.0",
            "version_major": 1,
            "version_minor": 15,
            "version_patch": 0,
            "release_candidate": false,
            "status": status,
            "aux": {},
            "parallelism": {},
            "latest_symlink": null,
            "pipelines": pipelines,
        }))
        .unwrap()
    }

    fn empty_pipeline(status: &str) -> serde_json::Value {
        serde_json::json!({
            "name": "pipe",
            "url": "pipelines/pipe",
            "status": status,
            "ci_stages": [{
                "name": "build",
                "url": "artifacts/pipe/build",
                "status": "success",
                "progress": 0,
                "complete": true,
                "jobs": [],
            }],
        })
    }

    #[test]
    fn empty_pipeline_is_successful_and_valid() {
        let run = minimal_run("success", serde_json::json!([empty_pipeline("success")]));
        validate_run(&run).unwrap();
    }

    #[test]
    fn wrong_run_status_is_rejected() {
        let run = minimal_run("fail", serde_json::json!([empty_pipeline("success")]));
        assert!(matches!(
            validate_run(&run),
            Err(SchemaError::RunStatus { .. })
        ));
    }

    #[test]
    fn wrong_stage_order_is_rejected() {
        let mut run = minimal_run("success", serde_json::json!([empty_pipeline("success")]));
        run.fields.stages = vec!["build".to_string(), "test".to_string()];
        assert!(matches!(
            validate_run(&run),
            Err(SchemaError::StageOrder { .. })
        ));
    }

    #[test]
    fn complete_job_missing_outcome_is_rejected() {
        let mut pipeline = empty_pipeline("success");
        pipeline["ci_stages"][0]["jobs"] = serde_json::json!([{
            "complete": true,
            "duration_str": null,
            "wrapper_arguments": {
                "job_id": "j",
                "command": "true",
                "pipeline_name": "pipe",
                "ci_stage": "build",
            },
        }]);
        pipeline["ci_stages"][0]["progress"] = serde_json::json!(100);
        let run = minimal_run("success", serde_json::json!([pipeline]));
        assert!(matches!(
            validate_run(&run),
            Err(SchemaError::IncompleteRecord { .. })
        ));
    }

    #[test]
    fn malformed_timestamps_are_rejected() {
        let mut run = minimal_run("success", serde_json::json!([empty_pipeline("success")]));
        run.fields.start_time = "yesterday".to_string();
        assert!(matches!(
            validate_run(&run),
            Err(SchemaError::Timestamp { .. })
        ));
    }
}
