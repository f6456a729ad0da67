//! Joining job shards with their status files into the run document.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;

use litani_core::model::{
    Cache, JobRecord, JobSpec, Outcome, Pipeline, Run, RunStatus, Stage,
};
use litani_core::time;
use litani_core::{paths, store};

/// Read the fused cache and every available status file, group jobs into
/// pipelines and stages, compute all derived statistics, and validate the
/// result.
pub fn get_run_data(cache_dir: &Path) -> anyhow::Result<Run> {
    let cache = store::read_cache(cache_dir)?;
    let run = assemble(cache_dir, cache)?;
    crate::validate::validate_run(&run)?;
    Ok(run)
}

fn assemble(cache_dir: &Path, cache: Cache) -> anyhow::Result<Run> {
    // pipeline name -> stage name -> jobs, in shard enumeration order.
    let mut grouped: BTreeMap<String, BTreeMap<String, Vec<JobRecord>>> = BTreeMap::new();
    for job in cache.jobs {
        let record = read_status(cache_dir, &job)?;
        grouped
            .entry(job.pipeline_name.clone())
            .or_default()
            .entry(job.ci_stage.clone())
            .or_default()
            .push(record);
    }

    let mut fields = cache.fields;
    let mut pipelines = Vec::with_capacity(grouped.len());
    for (pipeline_name, mut stages) in grouped {
        let mut ci_stages = Vec::with_capacity(fields.stages.len());
        for stage_name in &fields.stages {
            let jobs = stages.remove(stage_name).unwrap_or_default();
            ci_stages.push(make_stage(stage_name, &pipeline_name, jobs));
        }
        pipelines.push(make_pipeline(pipeline_name, ci_stages));
    }
    pipelines.sort_by_key(|pipe| pipe.status);

    fields.status = run_status(&pipelines);
    Ok(Run { fields, pipelines })
}

fn read_status(cache_dir: &Path, job: &JobSpec) -> anyhow::Result<JobRecord> {
    let path = paths::status_dir(cache_dir).join(format!("{}.json", job.job_id));
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("decoding job status {}", path.display())),
        // No status file: the wrapper has not finished (or never started).
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok(JobRecord::not_started(job.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Total order on jobs within a stage: by start time then end time, with
/// jobs that have not started sorted to the tail.
fn job_sort_key(job: &JobRecord) -> (bool, String, bool, String) {
    (
        job.start_time.is_none(),
        job.start_time.clone().unwrap_or_default(),
        job.end_time.is_none(),
        job.end_time.clone().unwrap_or_default(),
    )
}

fn attach_duration(job: &mut JobRecord) {
    let (Some(start), Some(end)) = (
        job.start_time.as_deref().and_then(time::parse),
        job.end_time.as_deref().and_then(time::parse),
    ) else {
        job.duration_str = None;
        return;
    };
    let seconds = (end - start).num_seconds();
    job.duration = Some(seconds);
    job.duration_str = Some(time::duration_str(seconds));
}

fn make_stage(stage_name: &str, pipeline_name: &str, mut jobs: Vec<JobRecord>) -> Stage {
    jobs.sort_by_key(job_sort_key);
    for job in &mut jobs {
        attach_duration(job);
    }

    let complete_jobs = jobs.iter().filter(|j| j.complete).count();
    let (progress, complete) = if jobs.is_empty() {
        (0, true)
    } else {
        (
            (complete_jobs * 100 / jobs.len()) as u8,
            complete_jobs == jobs.len(),
        )
    };

    let mut status = Outcome::Success;
    for job in jobs.iter().filter(|j| j.complete) {
        match job.outcome {
            Some(Outcome::Fail) => status = Outcome::Fail,
            Some(Outcome::FailIgnored) if status == Outcome::Success => {
                status = Outcome::FailIgnored
            }
            _ => {}
        }
    }

    Stage {
        name: stage_name.to_string(),
        url: format!("artifacts/{pipeline_name}/{stage_name}"),
        status,
        progress,
        complete,
        jobs,
    }
}

fn make_pipeline(name: String, ci_stages: Vec<Stage>) -> Pipeline {
    let mut status = if ci_stages.iter().any(|s| !s.complete) {
        RunStatus::InProgress
    } else {
        RunStatus::Success
    };
    // A failing stage beats in-progress: the pipeline is already lost.
    if ci_stages
        .iter()
        .any(|s| matches!(s.status, Outcome::Fail | Outcome::FailIgnored))
    {
        status = RunStatus::Fail;
    }

    Pipeline {
        url: format!("pipelines/{name}"),
        name,
        status,
        ci_stages,
    }
}

fn run_status(pipelines: &[Pipeline]) -> RunStatus {
    let mut status = RunStatus::Success;
    if pipelines.iter().any(|p| p.status == RunStatus::InProgress) {
        status = RunStatus::InProgress;
    }
    if pipelines.iter().any(|p| p.status == RunStatus::Fail) {
        status = RunStatus::Fail;
    }
    status
}
