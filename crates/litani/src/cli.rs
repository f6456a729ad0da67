//! The command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use litani_core::model::JobSpec;

#[derive(Debug, Parser)]
#[command(
    name = "litani",
    version,
    about = "Metabuild system with a pipeline-oriented HTML dashboard"
)]
pub struct Cli {
    /// Print informational messages.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Print debug messages.
    #[arg(short = 'w', long, global = true)]
    pub very_verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set up a new run context.
    Init(InitArgs),
    /// Add a single job to the current run.
    AddJob(JobArgs),
    /// Run a single job under the wrapper (normally invoked by the
    /// scheduler).
    Exec(ExecArgs),
    /// Execute every added job and publish the report.
    RunBuild(RunBuildArgs),
    /// Print a consistent snapshot of the in-progress run.
    DumpRun(DumpRunArgs),
    /// Print the job graph in DOT format.
    PrintGraph(PrintGraphArgs),
    /// Print the features this version of litani supports.
    PrintCapabilities(PrintCapabilitiesArgs),
}

fn parse_pool(value: &str) -> Result<(String, u32), String> {
    let (name, depth) = value
        .split_once(':')
        .ok_or_else(|| format!("expected 'name:depth', got '{value}'"))?;
    if name.is_empty() {
        return Err(format!("empty pool name in '{value}'"));
    }
    let depth: u32 = depth
        .parse()
        .map_err(|_| format!("invalid pool depth in '{value}'"))?;
    Ok((name.to_string(), depth))
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Name of the project this run belongs to.
    #[arg(long)]
    pub project: String,

    /// Stage names, in execution order.
    #[arg(long, num_args = 1..)]
    pub stages: Vec<String>,

    /// Pool declarations of the form `name:depth`.
    #[arg(long, num_args = 1.., value_parser = parse_pool)]
    pub pools: Vec<(String, u32)>,

    /// Use this directory as the run's cache directory.
    #[arg(long)]
    pub output_directory: Option<PathBuf>,

    /// Create the run's cache directory under this prefix.
    #[arg(long, conflicts_with = "output_directory")]
    pub output_prefix: Option<PathBuf>,

    /// Maintain a symlink at this path pointing to the latest run.
    #[arg(long, conflicts_with = "output_directory")]
    pub output_symlink: Option<PathBuf>,
}

/// Flags describing one job; shared between `add-job` and `exec`.
#[derive(Debug, Clone, Default, Args)]
pub struct JobArgs {
    /// The command to run in a subshell.
    #[arg(long)]
    pub command: Option<String>,

    /// Pipeline the job belongs to.
    #[arg(long)]
    pub pipeline_name: Option<String>,

    /// Stage the job runs in.
    #[arg(long)]
    pub ci_stage: Option<String>,

    /// Files the job consumes.
    #[arg(long, num_args = 0..)]
    pub inputs: Option<Vec<String>>,

    /// Files the job produces.
    #[arg(long, num_args = 0..)]
    pub outputs: Option<Vec<String>>,

    /// Human-readable description.
    #[arg(long)]
    pub description: Option<String>,

    /// Concurrency pool declared at init time.
    #[arg(long)]
    pub pool: Option<String>,

    /// Free-form tags; `stats-group:<name>` groups jobs on the dashboard.
    #[arg(long, num_args = 0..)]
    pub tags: Option<Vec<String>>,

    /// Seconds before the command's process group is killed.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// A timeout counts as success.
    #[arg(long)]
    pub timeout_ok: bool,

    /// A timeout counts as an ignored failure.
    #[arg(long, conflicts_with = "timeout_ok")]
    pub timeout_ignore: bool,

    /// Extra return codes that count as success.
    #[arg(long, num_args = 0..)]
    pub ok_returns: Option<Vec<i32>>,

    /// Return codes that count as ignored failures.
    #[arg(long, num_args = 0..)]
    pub ignore_returns: Option<Vec<i32>>,

    /// JSON or YAML outcome table to use instead of the default.
    #[arg(long)]
    pub outcome_table: Option<PathBuf>,

    /// Declared outputs that may legitimately not exist after the run.
    /// With no values, every output is phony.
    #[arg(long, num_args = 0..)]
    pub phony_outputs: Option<Vec<String>>,

    /// Merge the command's stderr into its stdout stream.
    #[arg(long)]
    pub interleave_stdout_stderr: bool,

    /// Periodically sample the memory usage of the command's process tree.
    #[arg(long)]
    pub profile_memory: bool,

    /// Seconds between memory samples.
    #[arg(long, default_value_t = 10)]
    pub profile_memory_interval: u64,

    /// Directory to run the command in.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Also write the command's stdout to this file.
    #[arg(long)]
    pub stdout_file: Option<PathBuf>,

    /// Also write the command's stderr to this file.
    #[arg(long)]
    pub stderr_file: Option<PathBuf>,

    /// Also write the job's status record to this file.
    #[arg(long)]
    pub status_file: Option<PathBuf>,
}

impl JobArgs {
    /// Validate the flags into an immutable job spec.
    pub fn into_spec(self, job_id: String) -> anyhow::Result<JobSpec> {
        let require = |field: Option<String>, name: &str| {
            field.ok_or_else(|| anyhow::anyhow!("the --{name} flag is required"))
        };
        let path_str = |p: Option<PathBuf>| p.map(|p| p.display().to_string());

        Ok(JobSpec {
            job_id,
            command: require(self.command, "command")?,
            pipeline_name: require(self.pipeline_name, "pipeline-name")?,
            ci_stage: require(self.ci_stage, "ci-stage")?,
            inputs: self.inputs,
            outputs: self.outputs,
            description: self.description,
            pool: self.pool,
            tags: self.tags,
            timeout: self.timeout,
            timeout_ok: self.timeout_ok,
            timeout_ignore: self.timeout_ignore,
            ok_returns: self.ok_returns,
            ignore_returns: self.ignore_returns,
            outcome_table: path_str(self.outcome_table),
            phony_outputs: self.phony_outputs,
            interleave_stdout_stderr: self.interleave_stdout_stderr,
            profile_memory: self.profile_memory,
            profile_memory_interval: self.profile_memory_interval,
            cwd: path_str(self.cwd),
            stdout_file: path_str(self.stdout_file),
            stderr_file: path_str(self.stderr_file),
            status_file: path_str(self.status_file),
            verbose: false,
            very_verbose: false,
        })
    }
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Run a previously added job by its ID.
    #[arg(long)]
    pub job_id: Option<String>,

    #[command(flatten)]
    pub job: JobArgs,
}

#[derive(Debug, Args)]
pub struct RunBuildArgs {
    /// Only run these pipelines.
    #[arg(long, num_args = 1..)]
    pub pipelines: Vec<String>,

    /// Only run this stage.
    #[arg(long, conflicts_with = "pipelines")]
    pub ci_stage: Option<String>,

    /// Ask the scheduler what it would do without running jobs.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Maximum number of jobs to run concurrently.
    #[arg(short = 'j', long = "parallel")]
    pub parallel: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DumpRunArgs {
    /// Give up after this many attempts instead of retrying forever.
    #[arg(short = 'r', long)]
    pub retries: Option<u32>,
}

#[derive(Debug, Args)]
pub struct PrintGraphArgs {
    /// Only print these pipelines.
    #[arg(long, num_args = 1..)]
    pub pipelines: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PrintCapabilitiesArgs {
    /// Print an aligned name/description table instead of JSON.
    #[arg(short = 'r', long)]
    pub human_readable: bool,
}
