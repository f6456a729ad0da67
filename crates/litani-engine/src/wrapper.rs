//! The job wrapper: runs one command under supervision and records what
//! happened.
//!
//! The command runs in its own process group so that a timeout can kill
//! the whole subtree (SIGTERM, one second of grace, then SIGKILL). While
//! it runs, an optional profiler task samples the subtree's memory; the
//! two race, and whichever way the command ends the profiler is cancelled
//! and finalizes its peak before the status is assembled.

use std::os::unix::process::ExitStatusExt as _;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::watch;

use litani_core::model::{JobRecord, JobSpec, MemoryTrace, Outcome};
use litani_core::paths;
use litani_core::time;
use litani_core::{atomic::atomic_write, ENV_VAR_JOB_ID};

use crate::artifact::{ArtifactError, Copier};
use crate::outcome;

struct CommandResult {
    return_code: i32,
    timeout_reached: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    memory_trace: MemoryTrace,
}

/// Run one job to completion and write its status record. The returned
/// record's `wrapper_return_code` is the process exit code `exec` must
/// use: 0 unless the outcome is `fail`.
pub async fn run_job(cache_dir: &Path, spec: JobSpec) -> anyhow::Result<JobRecord> {
    if spec.verbose {
        eprintln!("{}", spec.command);
    }

    let start_time = time::now_str();
    let result = supervise(&spec).await?;
    let end_time = time::now_str();

    let stdout = lines_of(&result.stdout);
    let stderr = if spec.interleave_stdout_stderr {
        None
    } else {
        lines_of(&result.stderr)
    };

    if let Some(path) = &spec.stdout_file {
        std::fs::write(path, &result.stdout)?;
    }
    if let Some(path) = &spec.stderr_file {
        std::fs::write(path, &result.stderr)?;
    }

    let missing_output = copy_artifacts(cache_dir, &spec)?;

    let (table, loaded_from_file) = outcome::table_for(&spec)?;
    let mut decided = table.decide(result.return_code, result.timeout_reached)?;
    if missing_output {
        decided = Outcome::Fail;
    }

    let record = JobRecord {
        complete: true,
        start_time: Some(start_time),
        end_time: Some(end_time),
        duration: None,
        duration_str: None,
        outcome: Some(decided),
        timeout_reached: Some(result.timeout_reached),
        command_return_code: Some(result.return_code),
        wrapper_return_code: Some(if decided == Outcome::Fail { 1 } else { 0 }),
        stdout,
        stderr,
        memory_trace: result.memory_trace,
        loaded_outcome_dict: if loaded_from_file {
            Some(serde_json::to_value(&table)?)
        } else {
            None
        },
        wrapper_arguments: spec,
    };

    if decided != Outcome::Success || record.wrapper_arguments.very_verbose {
        echo_captured(&record);
    }

    write_status(cache_dir, &record)?;
    Ok(record)
}

async fn supervise(spec: &JobSpec) -> anyhow::Result<CommandResult> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(&spec.command);
    cmd.env(ENV_VAR_JOB_ID, &spec.job_id);
    cmd.process_group(0);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    // One pipe per stream, or a single shared pipe when interleaving, so
    // interleaved output keeps the order the command produced it in.
    let (out_reader, out_writer) = std::io::pipe()?;
    let err_reader = if spec.interleave_stdout_stderr {
        cmd.stdout(out_writer.try_clone()?);
        cmd.stderr(out_writer);
        None
    } else {
        let (err_reader, err_writer) = std::io::pipe()?;
        cmd.stdout(out_writer);
        cmd.stderr(err_writer);
        Some(err_reader)
    };

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning command for job '{}'", spec.job_id))?;
    // The Command still holds the parent's copies of the pipe write ends;
    // drop it so the readers see EOF when the subtree exits.
    drop(cmd);

    let pid = child
        .id()
        .ok_or_else(|| anyhow::anyhow!("child for job '{}' has no PID", spec.job_id))? as i32;

    let out_task = tokio::task::spawn_blocking(move || read_all(out_reader));
    let err_task = err_reader.map(|reader| tokio::task::spawn_blocking(move || read_all(reader)));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let profiler = if spec.profile_memory {
        Some(tokio::spawn(crate::profiler::run(
            pid as u32,
            spec.profile_memory_interval,
            cancel_rx,
        )))
    } else {
        None
    };

    let mut timeout_reached = false;
    let status = match spec.timeout {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    timeout_reached = true;
                    kill_group(pid).await;
                    child.wait().await?
                }
            }
        }
        None => child.wait().await?,
    };

    let _ = cancel_tx.send(true);
    let memory_trace = match profiler {
        Some(task) => task.await?,
        None => MemoryTrace::default(),
    };

    let stdout = out_task.await??;
    let stderr = match err_task {
        Some(task) => task.await??,
        None => Vec::new(),
    };

    // A signal death maps to the negated signal number, like the POSIX
    // shell convention for wait statuses.
    let return_code = status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1);

    Ok(CommandResult {
        return_code,
        timeout_reached,
        stdout,
        stderr,
        memory_trace,
    })
}

/// SIGTERM the job's process group, give it a second, then SIGKILL
/// whatever is left.
async fn kill_group(pgid: i32) {
    unsafe {
        libc::killpg(pgid, libc::SIGTERM);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

fn read_all(mut reader: std::io::PipeReader) -> std::io::Result<Vec<u8>> {
    use std::io::Read as _;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

fn lines_of(bytes: &[u8]) -> Option<Vec<String>> {
    if bytes.is_empty() {
        return None;
    }
    Some(
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::to_string)
            .collect(),
    )
}

/// Copy declared outputs into the artifact area. Returns true when a
/// non-phony output was missing, which forces the job's outcome to fail.
fn copy_artifacts(cache_dir: &Path, spec: &JobSpec) -> anyhow::Result<bool> {
    let artifacts_dir = paths::artifacts_dir(cache_dir)
        .join(&spec.pipeline_name)
        .join(&spec.ci_stage);
    let copier = Copier::new(&artifacts_dir, spec);

    let mut missing = false;
    for output in spec.outputs.iter().flatten() {
        match copier.copy_output_artifact(output) {
            Ok(()) => {}
            Err(ArtifactError::MissingOutput(path)) => {
                tracing::error!(
                    "job '{}' did not produce declared output '{path}'",
                    spec.job_id
                );
                missing = true;
            }
            Err(ArtifactError::Io(err)) => return Err(err.into()),
        }
    }
    Ok(missing)
}

fn echo_captured(record: &JobRecord) {
    for line in record.stdout.iter().flatten() {
        eprintln!("{line}");
    }
    for line in record.stderr.iter().flatten() {
        eprintln!("{line}");
    }
}

fn write_status(cache_dir: &Path, record: &JobRecord) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    let path =
        paths::status_dir(cache_dir).join(format!("{}.json", record.wrapper_arguments.job_id));
    atomic_write(&path, &json)?;
    if let Some(extra) = &record.wrapper_arguments.status_file {
        atomic_write(Path::new(extra), &json)?;
    }
    Ok(())
}
