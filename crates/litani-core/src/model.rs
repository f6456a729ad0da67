//! The persisted data model: job specs, job records, and the run document.
//!
//! Everything here round-trips through JSON. The shapes are shared between
//! the shard files written by `add-job`, the status files written by the
//! job wrapper, the fused `cache.json`, and the aggregated `run.json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The outcome of a single job, also used as the status of a CI stage.
///
/// Variant order matters: stages sort and aggregate with `fail` as the
/// most severe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Fail,
    FailIgnored,
    Success,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Fail => "fail",
            Outcome::FailIgnored => "fail_ignored",
            Outcome::Success => "success",
        }
    }
}

/// The status of a pipeline or of the run as a whole.
///
/// Variant order gives the report-time pipeline sort: failed pipelines
/// first, then in-progress ones, then successful ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Fail,
    InProgress,
    Success,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Fail => "fail",
            RunStatus::InProgress => "in_progress",
            RunStatus::Success => "success",
        }
    }
}

/// An immutable job specification, as written by `add-job` and echoed back
/// under `wrapper_arguments` in every job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Globally-unique ID for this job.
    pub job_id: String,

    /// The command executed in a subshell.
    pub command: String,

    /// Pipeline this job belongs to.
    pub pipeline_name: String,

    /// Stage this job runs in; must be one of the run's `stages`.
    pub ci_stage: String,

    /// Files that must be up to date before the job runs.
    #[serde(default)]
    pub inputs: Option<Vec<String>>,

    /// Files the job makes up to date when it completes.
    #[serde(default)]
    pub outputs: Option<Vec<String>>,

    /// Human-readable description, shown in progress lines and reports.
    #[serde(default)]
    pub description: Option<String>,

    /// Concurrency pool this job is a member of, if any.
    #[serde(default)]
    pub pool: Option<String>,

    /// Free-form user tags. `stats-group:<name>` tags group jobs on the
    /// dashboard.
    #[serde(default)]
    pub tags: Option<Vec<String>>,

    /// Seconds the command may run before SIGTERM/SIGKILL.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Treat a timeout as `success`.
    #[serde(default)]
    pub timeout_ok: bool,

    /// Treat a timeout as `fail_ignored`.
    #[serde(default)]
    pub timeout_ignore: bool,

    /// Return codes that count as `success` in the default outcome table.
    #[serde(default)]
    pub ok_returns: Option<Vec<i32>>,

    /// Return codes that count as `fail_ignored` in the default outcome
    /// table.
    #[serde(default)]
    pub ignore_returns: Option<Vec<i32>>,

    /// Path to a JSON or YAML outcome table, overriding the default one.
    #[serde(default)]
    pub outcome_table: Option<String>,

    /// Outputs whose absence after the command runs is tolerated. An empty
    /// list means every output is phony; a missing key means none are.
    #[serde(default)]
    pub phony_outputs: Option<Vec<String>>,

    /// Send the command's stderr into the stdout stream. The record's
    /// `stderr` is then empty and `stdout` holds both streams' lines.
    #[serde(default)]
    pub interleave_stdout_stderr: bool,

    /// Sample the memory usage of the command's process tree while it runs.
    #[serde(default)]
    pub profile_memory: bool,

    /// Seconds between memory samples when `profile_memory` is set.
    #[serde(default = "default_profile_interval")]
    pub profile_memory_interval: u64,

    /// Directory to run the command in; defaults to the caller's cwd.
    #[serde(default)]
    pub cwd: Option<String>,

    /// Also write captured stdout to this file.
    #[serde(default)]
    pub stdout_file: Option<String>,

    /// Also write captured stderr to this file.
    #[serde(default)]
    pub stderr_file: Option<String>,

    /// Also write the job status record to this file.
    #[serde(default)]
    pub status_file: Option<String>,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub very_verbose: bool,
}

fn default_profile_interval() -> u64 {
    10
}

/// One memory sample across the job's process tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Second-precision UTC stamp.
    pub time: String,
    /// Resident set size in bytes.
    pub rss: u64,
    /// Virtual memory size in bytes.
    pub vsz: u64,
}

/// Peak memory usage over a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPeak {
    pub rss: u64,
    pub vsz: u64,
    pub human_readable_rss: String,
    pub human_readable_vsz: String,
}

/// Memory usage of a job over time. Empty (both keys absent) when the job
/// was not profiled or no sample was taken before the command finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTrace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<MemorySample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak: Option<MemoryPeak>,
}

impl MemoryTrace {
    pub fn is_empty(&self) -> bool {
        self.trace.is_none() && self.peak.is_none()
    }
}

/// A job as it appears in the run document: the immutable spec plus
/// whatever the wrapper has recorded so far. A record with `complete ==
/// false` and no `start_time` describes a job that has not started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub complete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    /// Wall-clock duration in whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,

    /// Human-readable duration; always present, null until the job ends.
    #[serde(default)]
    pub duration_str: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_reached: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_return_code: Option<i32>,

    /// 0 unless the outcome is `fail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_return_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "MemoryTrace::is_empty")]
    pub memory_trace: MemoryTrace,

    /// The outcome table as loaded from file, when one was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_outcome_dict: Option<serde_json::Value>,

    pub wrapper_arguments: JobSpec,
}

impl JobRecord {
    /// The stub recorded for a job with no status file yet.
    pub fn not_started(spec: JobSpec) -> Self {
        JobRecord {
            complete: false,
            start_time: None,
            end_time: None,
            duration: None,
            duration_str: None,
            outcome: None,
            timeout_reached: None,
            command_return_code: None,
            wrapper_return_code: None,
            stdout: None,
            stderr: None,
            memory_trace: MemoryTrace::default(),
            loaded_outcome_dict: None,
            wrapper_arguments: spec,
        }
    }
}

/// One sample of the scheduler's progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismSample {
    /// Microsecond-precision UTC stamp.
    pub time: String,
    pub running: u64,
    pub finished: u64,
    pub total: u64,
}

/// Parallelism measurements for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parallelism {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<ParallelismSample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_proc: Option<u64>,
}

/// All the jobs of one stage of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Report-relative URL of this stage's artifacts.
    pub url: String,
    pub status: Outcome,
    /// Completed share of the stage's jobs, 0..=100.
    pub progress: u8,
    pub complete: bool,
    pub jobs: Vec<JobRecord>,
}

/// A named workflow: its stages in run order, each holding its jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    /// Report-relative URL of this pipeline's page.
    pub url: String,
    pub status: RunStatus,
    pub ci_stages: Vec<Stage>,
}

/// Fields shared between the cache skeleton and the aggregated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFields {
    pub run_id: String,
    pub project: String,
    /// Stage names in execution order; every pipeline's `ci_stages` list
    /// follows this order.
    pub stages: Vec<String>,
    /// Pool name to depth.
    pub pools: BTreeMap<String, u32>,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub version: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    pub release_candidate: bool,
    pub status: RunStatus,
    /// Free-form user data, carried through untouched.
    pub aux: serde_json::Map<String, serde_json::Value>,
    pub parallelism: Parallelism,
    /// The symlink advertised to users, when `init` maintained one.
    #[serde(default)]
    pub latest_symlink: Option<String>,
}

/// The fused job cache: run metadata plus every job shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    #[serde(flatten)]
    pub fields: RunFields,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

/// The aggregated run document published as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    #[serde(flatten)]
    pub fields: RunFields,
    pub pipelines: Vec<Pipeline>,
}

impl Run {
    /// Iterate over every job of every pipeline stage.
    pub fn jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.pipelines
            .iter()
            .flat_map(|pipe| pipe.ci_stages.iter())
            .flat_map(|stage| stage.jobs.iter())
    }
}
