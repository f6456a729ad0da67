//! Driving the Ninja scheduler and reconstructing the run's parallelism
//! trace from its progress stream.
//!
//! `NINJA_STATUS` is pointed at a machine-readable template so that every
//! status line carries the running/finished/total counters. A reader task
//! consumes stdout line by line: status lines feed the trace and a
//! single-line TTY progress indicator, everything else passes through.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;

use regex::Regex;
use tokio::io::{AsyncBufReadExt as _, BufReader};

use litani_core::model::{Parallelism, ParallelismSample};
use litani_core::time;

use crate::ninja::{pipeline_target, stage_target};

/// The template litani asks Ninja to prefix status lines with.
/// Format directives documented at
/// https://ninja-build.org/manual.html#_environment_variables
pub const STATUS_FORMAT: &str = "<ninja>:%r/%f/%t ";

#[derive(Debug, thiserror::Error)]
#[error("ninja exited with {return_code} before reporting any job status")]
pub struct SchedulerFailure {
    pub return_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NinjaStatus {
    pub running: u64,
    pub finished: u64,
    pub total: u64,
    pub message: String,
}

pub struct StatusParser {
    status_re: Regex,
}

impl Default for StatusParser {
    fn default() -> Self {
        StatusParser {
            status_re: Regex::new(r"^<ninja>:(\d+)/(\d+)/(\d+) (.+)$")
                .unwrap_or_else(|_| unreachable!("status regex is well-formed")),
        }
    }
}

impl StatusParser {
    pub fn parse_status(&self, line: &str) -> Option<NinjaStatus> {
        let caps = self.status_re.captures(line)?;
        Some(NinjaStatus {
            running: caps[1].parse().ok()?,
            finished: caps[2].parse().ok()?,
            total: caps[3].parse().ok()?,
            message: caps[4].to_string(),
        })
    }
}

/// Render the one-line progress indicator, truncated or padded to the TTY
/// width when one is known.
fn format_progress(finished: u64, total: u64, message: &str, tty_width: Option<usize>) -> String {
    let Some(width) = tty_width else {
        return message.to_string();
    };

    let digits = |n: u64| n.max(1).ilog10() as usize + 1;
    let progress_width = digits(finished) + digits(total) + "[/] ".len();

    if message.len() + progress_width <= width {
        let padding = width - message.len() - progress_width;
        format!("[{finished}/{total}] {message}{}", " ".repeat(padding))
    } else {
        let message_width = width.saturating_sub(progress_width + 3);
        let truncated: String = message.chars().take(message_width).collect();
        format!("[{finished}/{total}] {truncated}...")
    }
}

#[derive(Default)]
struct OutputAccumulator {
    parser: StatusParser,
    trace: Vec<ParallelismSample>,
    finished: Option<u64>,
    total: Option<u64>,
}

impl OutputAccumulator {
    fn process_line(&mut self, line: &str) {
        let Some(status) = self.parser.parse_status(line) else {
            println!("{line}");
            return;
        };

        self.trace.push(ParallelismSample {
            time: time::now_str_ms(),
            running: status.running,
            finished: status.finished,
            total: status.total,
        });

        if self.finished != Some(status.finished) || self.total != Some(status.total) {
            self.finished = Some(status.finished);
            self.total = Some(status.total);
            let width = crossterm::terminal::size().ok().map(|(w, _)| w as usize);
            print!(
                "\r{}",
                format_progress(status.finished, status.total, &status.message, width)
            );
            let _ = std::io::stdout().flush();
        }
    }
}

/// One Ninja invocation over a previously materialized build file.
pub struct Driver {
    pub ninja_file: PathBuf,
    pub dry_run: bool,
    pub parallelism: Option<usize>,
    pub pipelines: Vec<String>,
    pub ci_stage: Option<String>,
}

pub struct DriverOutcome {
    pub success: bool,
    pub parallelism: Parallelism,
}

impl Driver {
    fn command_line(&self) -> Vec<String> {
        let mut cmd = vec![
            "ninja".to_string(),
            "-k".to_string(),
            "0".to_string(),
            "-f".to_string(),
            self.ninja_file.display().to_string(),
        ];
        if let Some(jobs) = self.parallelism {
            cmd.push("-j".to_string());
            cmd.push(jobs.to_string());
        }
        if self.dry_run {
            cmd.push("-n".to_string());
        }
        if !self.pipelines.is_empty() {
            cmd.extend(self.pipelines.iter().map(|p| pipeline_target(p)));
        } else if let Some(stage) = &self.ci_stage {
            cmd.push(stage_target(stage));
        }
        cmd
    }

    /// Run Ninja to completion, consuming its progress stream.
    pub async fn run(&self) -> anyhow::Result<DriverOutcome> {
        let cmd = self.command_line();
        tracing::debug!("running scheduler: {}", cmd.join(" "));

        let mut child = tokio::process::Command::new(&cmd[0])
            .args(&cmd[1..])
            .env("NINJA_STATUS", STATUS_FORMAT)
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("scheduler stdout was not piped"))?;

        let reader = tokio::spawn(async move {
            let mut acc = OutputAccumulator::default();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                acc.process_line(&line);
            }
            acc
        });

        let status = child.wait().await?;
        let acc = reader.await?;
        println!();

        let success = status.success();
        if !success && acc.trace.is_empty() {
            return Err(SchedulerFailure {
                return_code: status.code().unwrap_or(-1),
            }
            .into());
        }

        let max_parallelism = acc.trace.iter().map(|s| s.running).max();
        Ok(DriverOutcome {
            success,
            parallelism: Parallelism {
                trace: Some(acc.trace),
                max_parallelism,
                n_proc: std::thread::available_parallelism()
                    .ok()
                    .map(|n| n.get() as u64),
            },
        })
    }
}
