//! Materializing the fused job cache into a Ninja build file.
//!
//! Each job becomes one build edge whose recipe re-enters litani through
//! `exec`. Stages and pipelines become phony targets so that `run-build`
//! can ask Ninja for a subset of the graph.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use litani_core::atomic::atomic_write;
use litani_core::model::{Cache, JobSpec};

pub const STAGE_TARGET_PREFIX: &str = "__litani_ci_stage_";
pub const PIPELINE_TARGET_PREFIX: &str = "__litani_pipeline_name_";

pub fn stage_target(stage: &str) -> String {
    format!("{STAGE_TARGET_PREFIX}{stage}")
}

pub fn pipeline_target(pipeline: &str) -> String {
    format!("{PIPELINE_TARGET_PREFIX}{pipeline}")
}

/// Escape a path for use in a Ninja build statement.
fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '$' | ' ' | ':' => {
                out.push('$');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Escape a Ninja variable value: only `$` is special there.
fn escape_value(text: &str) -> String {
    text.replace('$', "$$")
}

/// Outputs of a job as Ninja sees them. A job with no declared outputs
/// still needs a build edge, so its ID stands in as a synthetic output
/// path that nothing ever creates.
fn job_outputs(job: &JobSpec) -> Vec<String> {
    match &job.outputs {
        Some(outputs) if !outputs.is_empty() => outputs.clone(),
        _ => vec![job.job_id.clone()],
    }
}

/// Render the build file for an entire run. The recipe of every edge
/// re-enters litani through `exec_program`.
pub fn build_file(cache: &Cache, exec_program: &str) -> String {
    let mut buf = String::new();

    for (pool, depth) in &cache.fields.pools {
        let _ = writeln!(buf, "pool {pool}\n  depth = {depth}\n");
    }

    let _ = writeln!(
        buf,
        "rule litani_exec\n  command = {} exec --job-id $job_id\n  description = $description\n",
        escape_value(exec_program)
    );

    let mut stage_deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut pipeline_deps: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for job in &cache.jobs {
        let outputs = job_outputs(job);
        let outputs_esc: Vec<String> = outputs.iter().map(|o| escape(o)).collect();
        let inputs_esc: Vec<String> = job
            .inputs
            .iter()
            .flatten()
            .map(|i| escape(i))
            .collect();

        let _ = write!(buf, "build {}: litani_exec", outputs_esc.join(" "));
        if !inputs_esc.is_empty() {
            let _ = write!(buf, " {}", inputs_esc.join(" "));
        }
        let _ = writeln!(buf);
        let _ = writeln!(buf, "  job_id = {}", job.job_id);
        let description = job.description.as_deref().unwrap_or(&job.command);
        let _ = writeln!(
            buf,
            "  description = {}",
            escape_value(&description.replace('\n', " "))
        );
        if let Some(pool) = &job.pool {
            let _ = writeln!(buf, "  pool = {pool}");
        }
        let _ = writeln!(buf);

        stage_deps
            .entry(job.ci_stage.clone())
            .or_default()
            .extend(outputs_esc.iter().cloned());
        pipeline_deps
            .entry(job.pipeline_name.clone())
            .or_default()
            .extend(outputs_esc);
    }

    for (stage, deps) in &stage_deps {
        let _ = writeln!(buf, "build {}: phony {}", stage_target(stage), deps.join(" "));
    }
    for (pipeline, deps) in &pipeline_deps {
        let _ = writeln!(
            buf,
            "build {}: phony {}",
            pipeline_target(pipeline),
            deps.join(" ")
        );
    }

    let defaults: Vec<String> = pipeline_deps.keys().map(|p| pipeline_target(p)).collect();
    if !defaults.is_empty() {
        let _ = writeln!(buf, "\ndefault {}", defaults.join(" "));
    }

    buf
}

/// Write the build file, using this process's own binary as the wrapper
/// so jobs do not depend on `litani` being on the scheduler's PATH.
pub fn write_ninja_file(path: &Path, cache: &Cache) -> anyhow::Result<()> {
    let exec_program = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "litani".to_string());
    atomic_write(path, build_file(cache, &exec_program))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(jobs: serde_json::Value, pools: serde_json::Value) -> Cache {
        serde_json::from_value(serde_json::json!({
            "run_id": "run",
            "project": "proj",
            "stages": ["build", "test"],
            "pools": pools,
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
            "jobs": jobs,
        }))
        .unwrap()
    }

    #[test]
    fn declares_pools_edges_and_phony_targets() {
        let cache = cache(
            serde_json::json!([
                {
                    "job_id": "j1",
                    "command": "cc -o bin main.c",
                    "pipeline_name": "pipe",
                    "ci_stage": "build",
                    "inputs": ["main.c"],
                    "outputs": ["bin"],
                    "pool": "slow",
                },
                {
                    "job_id": "j2",
                    "command": "./bin",
                    "pipeline_name": "pipe",
                    "ci_stage": "test",
                    "inputs": ["bin"],
                },
            ]),
            serde_json::json!({ "slow": 1 }),
        );

        let text = build_file(&cache, "litani");
        assert!(text.contains("pool slow\n  depth = 1"));
        assert!(text.contains("build bin: litani_exec main.c"));
        assert!(text.contains("  job_id = j1"));
        assert!(text.contains("  pool = slow"));
        // The outputless job gets its ID as a synthetic output.
        assert!(text.contains("build j2: litani_exec bin"));
        assert!(text.contains("build __litani_ci_stage_build: phony bin"));
        assert!(text.contains("build __litani_ci_stage_test: phony j2"));
        assert!(text.contains("build __litani_pipeline_name_pipe: phony bin j2"));
        assert!(text.contains("default __litani_pipeline_name_pipe"));
    }

    #[test]
    fn escapes_ninja_metacharacters_in_paths() {
        let cache = cache(
            serde_json::json!([{
                "job_id": "j",
                "command": "touch out",
                "pipeline_name": "pipe",
                "ci_stage": "build",
                "outputs": ["dir with space/out:file"],
            }]),
            serde_json::json!({}),
        );
        assert!(build_file(&cache, "litani").contains("build dir$ with$ space/out$:file: litani_exec"));
    }

    #[test]
    fn description_defaults_to_the_command() {
        let cache = cache(
            serde_json::json!([{
                "job_id": "j",
                "command": "make all",
                "pipeline_name": "pipe",
                "ci_stage": "build",
            }]),
            serde_json::json!({}),
        );
        assert!(build_file(&cache, "litani").contains("  description = make all"));
    }

    #[test]
    fn dollar_signs_in_descriptions_are_escaped() {
        let cache = cache(
            serde_json::json!([{
                "job_id": "j",
                "command": "echo $HOME",
                "pipeline_name": "pipe",
                "ci_stage": "build",
            }]),
            serde_json::json!({}),
        );
        assert!(build_file(&cache, "litani").contains("  description = echo $$HOME"));
    }
}
