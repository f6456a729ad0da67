//! The dump-run rendezvous: a signal-driven snapshot of an in-progress
//! run, read back with a consistency check relative to the requesting job.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use litani_core::atomic::atomic_write;
use litani_core::model::Run;
use litani_core::{pid, ENV_VAR_JOB_ID};

const DUMPED_RUN: &str = "dumped-run.json";

/// The signal `run-build` listens for; on receipt it writes the snapshot.
pub const DUMP_SIGNAL: i32 = libc::SIGUSR1;

#[derive(Debug, thiserror::Error)]
#[error("run snapshot is not yet consistent with job '{job_id}'")]
pub struct InconsistentRun {
    pub job_id: String,
}

/// Aggregate the current state of the run and write it where `dump-run`
/// will look for it. Called from `run-build`'s signal handler task.
pub fn write_snapshot(cache_dir: &Path) -> anyhow::Result<()> {
    let run = crate::aggregate::get_run_data(cache_dir)?;
    atomic_write(
        &cache_dir.join(DUMPED_RUN),
        serde_json::to_string_pretty(&run)?,
    )
}

/// Check that a snapshot reflects reality relative to `job_id`: every job
/// producing one of its declared inputs must be marked complete. The
/// check also fails when `job_id` is not in the snapshot at all.
pub fn run_consistent_to_job(run: &Run, job_id: &str) -> Result<(), InconsistentRun> {
    let inconsistent = || InconsistentRun {
        job_id: job_id.to_string(),
    };

    // output path -> (producing job, completeness)
    let mut producers: HashMap<&str, (&str, bool)> = HashMap::new();
    let mut job_inputs: Option<&[String]> = None;
    let mut found = false;

    for job in run.jobs() {
        let args = &job.wrapper_arguments;
        if args.job_id == job_id {
            found = true;
            job_inputs = args.inputs.as_deref();
        }
        for output in args.outputs.iter().flatten() {
            if let Some((other, _)) = producers.get(output.as_str()) {
                tracing::warn!(
                    "two jobs share an output '{output}': {other} and {}",
                    args.job_id
                );
            }
            producers.insert(output, (&args.job_id, job.complete));
        }
    }

    if !found {
        tracing::error!("could not find job with ID '{job_id}' in run");
        return Err(inconsistent());
    }

    for input in job_inputs.unwrap_or_default() {
        match producers.get(input.as_str()) {
            Some((producer, complete)) if !complete => {
                tracing::debug!(
                    "run inconsistent: job '{producer}' produces input '{input}' of job \
                     '{job_id}' but is not complete"
                );
                return Err(inconsistent());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Exponential backoff with jitter that doubles along with the delay.
pub struct BackoffSleeper {
    duration: f64,
    jitter: f64,
    multiplier: f64,
}

impl BackoffSleeper {
    pub fn new(jitter: f64) -> Self {
        BackoffSleeper {
            duration: 0.2,
            jitter,
            multiplier: 2.0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs_f64(self.duration);
        self.duration += self.jitter;
        self.duration *= self.multiplier;
        self.jitter *= self.multiplier;
        delay
    }

    pub async fn sleep(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

fn read_snapshot(cache_dir: &Path) -> Option<Run> {
    let raw = std::fs::read_to_string(cache_dir.join(DUMPED_RUN)).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Signal `run-build` and wait for a consistent snapshot, backing off
/// between attempts. `retries` bounds the attempt count; `None` retries
/// forever. Returns `None` when no run is in progress or the retry budget
/// is exhausted.
pub async fn dump_run(cache_dir: &Path, retries: Option<u32>) -> anyhow::Result<Option<Run>> {
    let Ok(run_pid) = pid::read(cache_dir) else {
        return Ok(None);
    };

    // A sub-second random phase keeps concurrent dump-run callers from
    // thundering in lockstep.
    let jitter = f64::from(std::process::id() % 997) / 997.0
        + chrono::Utc::now().timestamp_subsec_micros() as f64 / 1e7;
    let mut sleeper = BackoffSleeper::new(jitter % 1.0);

    let parent_job = std::env::var(ENV_VAR_JOB_ID).ok();
    let mut attempts = 0u32;

    loop {
        if let Some(limit) = retries {
            if attempts >= limit {
                return Ok(None);
            }
        }
        attempts += 1;

        if unsafe { libc::kill(run_pid, DUMP_SIGNAL) } != 0 {
            // run-build is gone; no snapshot will ever appear.
            return Ok(None);
        }

        if let Some(run) = read_snapshot(cache_dir) {
            let consistent = match &parent_job {
                Some(job_id) => run_consistent_to_job(&run, job_id).is_ok(),
                None => true,
            };
            if consistent {
                return Ok(Some(run));
            }
        }
        sleeper.sleep().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_jobs(jobs: Vec<serde_json::Value>) -> Run {
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
            "status": "in_progress",
            "aux": {},
            "parallelism": {},
            "latest_symlink": null,
            "pipelines": [{
                "name": "pipe",
                "url": "pipelines/pipe",
                "status": "in_progress",
                "ci_stages": [{
                    "name": "build",
                    "url": "artifacts/pipe/build",
                    "status": "success",
                    "progress": 0,
                    "complete": false,
                    "jobs": jobs,
                }],
            }],
        }))
        .unwrap()
    }

    fn job(
        id: &str,
        complete: bool,
        inputs: serde_json::Value,
        outputs: serde_json::Value,
    ) -> serde_json::Value {
        serde_json::json!({
            "complete": complete,
            "duration_str": null,
            "wrapper_arguments": {
                "job_id": id,
                "command": "true",
                "pipeline_name": "pipe",
                "ci_stage": "build",
                "inputs": inputs,
                "outputs": outputs,
            },
        })
    }

    #[test]
    fn unknown_job_id_is_inconsistent() {
        let run = run_with_jobs(vec![
            job("job 1", true, serde_json::Value::Null, serde_json::Value::Null),
            job("job 2", true, serde_json::Value::Null, serde_json::Value::Null),
        ]);
        assert!(run_consistent_to_job(&run, "job 3").is_err());
    }

    #[test]
    fn job_without_dependencies_is_consistent() {
        let run = run_with_jobs(vec![job(
            "job 1",
            false,
            serde_json::Value::Null,
            serde_json::Value::Null,
        )]);
        run_consistent_to_job(&run, "job 1").unwrap();
    }

    #[test]
    fn incomplete_reverse_dependency_is_inconsistent() {
        let run = run_with_jobs(vec![
            job("job 1", false, serde_json::Value::Null, serde_json::json!(["foo"])),
            job("job 2", false, serde_json::json!(["foo"]), serde_json::Value::Null),
        ]);
        assert!(run_consistent_to_job(&run, "job 2").is_err());
    }

    #[test]
    fn complete_reverse_dependency_is_consistent() {
        let run = run_with_jobs(vec![
            job("job 1", true, serde_json::Value::Null, serde_json::json!(["foo"])),
            job("job 2", false, serde_json::json!(["foo"]), serde_json::Value::Null),
        ]);
        run_consistent_to_job(&run, "job 2").unwrap();
    }

    #[test]
    fn unrelated_incomplete_job_does_not_matter() {
        let run = run_with_jobs(vec![
            job("job 1", true, serde_json::Value::Null, serde_json::json!(["foo"])),
            job("job 2", false, serde_json::json!(["foo"]), serde_json::Value::Null),
            job("job 3", false, serde_json::Value::Null, serde_json::json!(["bar"])),
        ]);
        run_consistent_to_job(&run, "job 2").unwrap();
    }

    #[test]
    fn every_reverse_dependency_must_be_complete() {
        let complete_deps = run_with_jobs(vec![
            job("job 1", true, serde_json::Value::Null, serde_json::json!(["foo"])),
            job("job 2", false, serde_json::json!(["foo", "bar"]), serde_json::Value::Null),
            job("job 3", true, serde_json::Value::Null, serde_json::json!(["bar"])),
        ]);
        run_consistent_to_job(&complete_deps, "job 2").unwrap();

        let one_incomplete = run_with_jobs(vec![
            job("job 1", true, serde_json::Value::Null, serde_json::json!(["foo"])),
            job("job 2", false, serde_json::json!(["foo", "bar"]), serde_json::Value::Null),
            job("job 3", false, serde_json::Value::Null, serde_json::json!(["bar"])),
        ]);
        assert!(run_consistent_to_job(&one_incomplete, "job 2").is_err());
    }

    #[test]
    fn backoff_grows_geometrically_with_doubling_jitter() {
        let mut sleeper = BackoffSleeper::new(0.1);
        let d1 = sleeper.next_delay().as_secs_f64();
        let d2 = sleeper.next_delay().as_secs_f64();
        let d3 = sleeper.next_delay().as_secs_f64();
        assert!((d1 - 0.2).abs() < 1e-9);
        assert!((d2 - 0.6).abs() < 1e-9);
        // (0.6 + 0.2) * 2
        assert!((d3 - 1.6).abs() < 1e-9);
    }
}
