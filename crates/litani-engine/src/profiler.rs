//! Periodic memory sampling of a job's process subtree.
//!
//! Each sample shells out to `ps` once, parses the full process table, and
//! walks the parent/child edges breadth-first from the job's root PID,
//! summing RSS and VSZ over the subtree. Peak computation happens during
//! cancellation cleanup so it runs even when the command finishes between
//! ticks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::watch;

use litani_core::model::{MemoryPeak, MemorySample, MemoryTrace};
use litani_core::time;

const PS_ARGS: [&str; 3] = ["-x", "-o", "pid,ppid,rss,vsz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessUsage {
    ppid: u32,
    /// Bytes.
    rss: u64,
    /// Bytes.
    vsz: u64,
}

/// Sample the subtree of `root_pid` every `interval` seconds until
/// `cancel` fires, then finalize the peak.
pub async fn run(root_pid: u32, interval: u64, mut cancel: watch::Receiver<bool>) -> MemoryTrace {
    let mut trace: Vec<MemorySample> = Vec::new();
    let interval = Duration::from_secs(interval.max(1));

    loop {
        match snapshot(root_pid).await {
            Ok(Some(sample)) => trace.push(sample),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("memory profiler stopped: {err:#}");
                break;
            }
        }

        tokio::select! {
            _ = cancel.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    finalize(trace)
}

fn finalize(trace: Vec<MemorySample>) -> MemoryTrace {
    if trace.is_empty() {
        return MemoryTrace::default();
    }
    let rss = trace.iter().map(|s| s.rss).max().unwrap_or(0);
    let vsz = trace.iter().map(|s| s.vsz).max().unwrap_or(0);
    MemoryTrace {
        trace: Some(trace),
        peak: Some(MemoryPeak {
            rss,
            vsz,
            human_readable_rss: human_readable(rss),
            human_readable_vsz: human_readable(vsz),
        }),
    }
}

async fn snapshot(root_pid: u32) -> anyhow::Result<Option<MemorySample>> {
    let output = tokio::process::Command::new("ps")
        .args(PS_ARGS)
        .output()
        .await?;
    if !output.status.success() {
        anyhow::bail!("ps exited with {}", output.status);
    }
    let table = parse_ps(&String::from_utf8_lossy(&output.stdout));
    Ok(subtree_usage(&table, root_pid).map(|(rss, vsz)| MemorySample {
        time: time::now_str(),
        rss,
        vsz,
    }))
}

/// Parse `ps -x -o pid,ppid,rss,vsz` output. RSS and VSZ are reported in
/// KiB and converted to bytes here.
fn parse_ps(output: &str) -> HashMap<u32, ProcessUsage> {
    let mut table = HashMap::new();
    for line in output.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(ppid), Some(rss), Some(vsz)) = (
            fields.next().and_then(|f| f.parse::<u32>().ok()),
            fields.next().and_then(|f| f.parse::<u32>().ok()),
            fields.next().and_then(|f| f.parse::<u64>().ok()),
            fields.next().and_then(|f| f.parse::<u64>().ok()),
        ) else {
            continue;
        };
        table.insert(
            pid,
            ProcessUsage {
                ppid,
                rss: rss * 1024,
                vsz: vsz * 1024,
            },
        );
    }
    table
}

/// Sum usage over `root` and its transitive children. None if the root has
/// already exited.
fn subtree_usage(table: &HashMap<u32, ProcessUsage>, root: u32) -> Option<(u64, u64)> {
    table.get(&root)?;

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, usage) in table {
        children.entry(usage.ppid).or_default().push(pid);
    }

    let (mut rss, mut vsz) = (0, 0);
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(usage) = table.get(&pid) {
            rss += usage.rss;
            vsz += usage.vsz;
        }
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids);
        }
    }
    Some((rss, vsz))
}

/// Render a byte count with the largest unit that keeps the value at or
/// below 1023, rounded half-up to one decimal place.
pub fn human_readable(memory: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = memory as f64;
    let mut idx = 0;
    while value > 1023.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    let value = (value * 10.0).round() / 10.0;
    format!("{value:.1} {}", UNITS[idx])
}
