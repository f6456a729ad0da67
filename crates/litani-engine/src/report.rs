//! Rendering and atomically publishing the HTML+JSON report.
//!
//! A report is rendered into a fresh directory under `report_data/`, then
//! published by renaming a sibling symlink over `<cache>/html`. Readers of
//! the symlink see either the previous tree or the new one. Old trees are
//! marked expired and garbage-collected once nobody holds their lock.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use uuid::Uuid;

use litani_core::atomic::atomic_write;
use litani_core::lock::{ExpirableDirectory, LockableDirectory};
use litani_core::model::{JobRecord, Pipeline, ParallelismSample, Run, RunStatus};
use litani_core::{paths, time, RUN_FILE};

use crate::artifact::copy_dir_all;
use crate::graph;

/// Optional external renderers, looked up on PATH once per publication.
struct ToolBox {
    gnuplot: bool,
    graphviz: bool,
}

impl ToolBox {
    fn detect() -> Self {
        ToolBox {
            gnuplot: which::which("gnuplot").is_ok(),
            graphviz: which::which("dot").is_ok(),
        }
    }
}

/// Render `run` and publish it as the run's current report.
pub fn render(run: &Run, cache_dir: &Path) -> anyhow::Result<()> {
    let report_data = paths::report_data_dir(cache_dir);
    let fresh_dir = report_data.join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&fresh_dir)?;

    let artifacts_src = paths::artifacts_dir(cache_dir);
    let artifacts_dst = fresh_dir.join("artifacts");
    if artifacts_src.exists() {
        copy_dir_all(&artifacts_src, &artifacts_dst)?;
    } else {
        std::fs::create_dir_all(&artifacts_dst)?;
    }
    render_artifact_indexes(&artifacts_dst)?;

    let tools = ToolBox::detect();
    let svgs = dashboard_svgs(run, &tools);
    atomic_write(&fresh_dir.join("index.html"), dashboard_page(run, &svgs))?;
    atomic_write(
        &fresh_dir.join(RUN_FILE),
        serde_json::to_string_pretty(run)?,
    )?;

    for pipe in &run.pipelines {
        render_pipeline(&fresh_dir, pipe, &tools)?;
    }

    publish(cache_dir, &fresh_dir)
}

/// The atomic swap: old tree stays valid for readers, then is expired and
/// eventually collected.
fn publish(cache_dir: &Path, fresh_dir: &Path) -> anyhow::Result<()> {
    let report_dir = paths::report_dir(cache_dir);
    let old_target = std::fs::read_link(&report_dir).ok();

    let temp_symlink = report_dir.with_file_name(format!("html~{}", Uuid::new_v4()));
    std::os::unix::fs::symlink(fresh_dir, &temp_symlink)?;
    std::fs::rename(&temp_symlink, &report_dir)
        .with_context(|| format!("publishing report at {}", report_dir.display()))?;

    // The fresh directory was born locked; releasing it tells readers the
    // tree is complete.
    LockableDirectory::new(fresh_dir).release()?;

    if let Some(old) = old_target {
        if old.exists() {
            ExpirableDirectory::new(&old).expire()?;
        }
    }
    unlink_expired(cache_dir)
}

/// Delete every report directory that is expired and unlocked.
pub fn unlink_expired(cache_dir: &Path) -> anyhow::Result<()> {
    let report_data = paths::report_data_dir(cache_dir);
    if !report_data.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&report_data)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let lock = LockableDirectory::new(&dir);
        if !lock.acquire() {
            continue;
        }
        if ExpirableDirectory::new(&dir).is_expired() {
            tracing::debug!("unlinking expired report {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
            // No release after deletion.
        } else {
            lock.release()?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parallelism trace and stats groups

/// Bucket microsecond samples per second for plotting: the minimum
/// finished count and maximum running/total within each second.
pub fn process_trace(trace: &[ParallelismSample]) -> Vec<ParallelismSample> {
    let mut buckets: BTreeMap<String, ParallelismSample> = BTreeMap::new();
    for item in trace {
        let Some(stamp) = time::parse_ms(&item.time) else {
            continue;
        };
        let second = stamp.format(time::TIME_FORMAT).to_string();
        buckets
            .entry(second.clone())
            .and_modify(|bucket| {
                bucket.finished = bucket.finished.min(item.finished);
                bucket.running = bucket.running.max(item.running);
                bucket.total = bucket.total.max(item.total);
            })
            .or_insert_with(|| ParallelismSample {
                time: second,
                ..item.clone()
            });
    }
    buckets.into_values().collect()
}

/// Jobs that opted into a `stats-group:<name>` tag, grouped by name.
pub fn stats_groups<'a>(
    run: &'a Run,
    job_filter: impl Fn(&JobRecord) -> bool,
) -> Vec<(String, Vec<&'a JobRecord>)> {
    let mut groups: BTreeMap<String, Vec<&JobRecord>> = BTreeMap::new();
    for job in run.jobs() {
        let mut group = None;
        for tag in job.wrapper_arguments.tags.iter().flatten() {
            let parts: Vec<&str> = tag.split(':').collect();
            if parts[0] != "stats-group" {
                continue;
            }
            if parts.len() != 2 {
                tracing::warn!(
                    "no value for stats-group in job '{}'",
                    job.wrapper_arguments.job_id
                );
                continue;
            }
            group = Some(parts[1].to_string());
            break;
        }
        let Some(group) = group else { continue };
        if job_filter(job) {
            groups.entry(group).or_default().push(job);
        }
    }
    groups.into_iter().collect()
}

// ---------------------------------------------------------------------------
// External renderers

fn run_gnuplot(script: &str) -> anyhow::Result<Vec<String>> {
    let mut child = std::process::Command::new("gnuplot")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("gnuplot stdin was not piped"))?
        .write_all(script.as_bytes())?;
    let output = child.wait_with_output()?;
    if !output.status.success() {
        anyhow::bail!("gnuplot exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.contains("<?xml version"))
        .map(str::to_string)
        .collect())
}

fn run_graphviz(dot_graph: &str, out_file: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let handle = std::fs::File::create(out_file)?;
    let mut child = std::process::Command::new("dot")
        .arg("-Tsvg")
        .stdin(std::process::Stdio::piped())
        .stdout(handle)
        .spawn()?;
    child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("dot stdin was not piped"))?
        .write_all(dot_graph.as_bytes())?;
    let status = child.wait()?;
    if !status.success() {
        anyhow::bail!("dot exited with {status}");
    }
    Ok(())
}

fn gnuplot_quote(text: &str) -> String {
    text.replace('\\', " ").replace('"', "'")
}

fn bars_script(title: &str, values: &[(String, f64)]) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "set terminal svg size 600,400");
    let _ = writeln!(script, "set title \"{}\"", gnuplot_quote(title));
    let _ = writeln!(script, "unset key");
    let _ = writeln!(script, "set style fill solid 0.5");
    let _ = writeln!(script, "set boxwidth 0.5");
    let _ = writeln!(script, "set xtics rotate by -45 scale 0");
    let _ = writeln!(script, "plot '-' using 0:2:xtic(1) with boxes");
    for (label, value) in values {
        let _ = writeln!(script, "\"{}\" {value}", gnuplot_quote(label));
    }
    let _ = writeln!(script, "e");
    script
}

fn parallelism_script(run: &Run, trace: &[ParallelismSample]) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "set terminal svg size 900,300");
    let _ = writeln!(script, "set title \"Run parallelism\"");
    let _ = writeln!(script, "set xdata time");
    let _ = writeln!(script, "set timefmt \"%Y-%m-%dT%H:%M:%SZ\"");
    let _ = writeln!(script, "set format x \"%H:%M:%S\"");
    if let Some(n_proc) = run.fields.parallelism.n_proc {
        let _ = writeln!(script, "# host has {n_proc} processors");
    }
    let _ = writeln!(
        script,
        "plot '-' using 1:2 with steps title \"running\", \
         '-' using 1:2 with steps title \"finished\""
    );
    for sample in trace {
        let _ = writeln!(script, "{} {}", sample.time, sample.running);
    }
    let _ = writeln!(script, "e");
    for sample in trace {
        let _ = writeln!(script, "{} {}", sample.time, sample.finished);
    }
    let _ = writeln!(script, "e");
    script
}

fn memory_trace_script(job: &JobRecord) -> Option<String> {
    let trace = job.memory_trace.trace.as_ref()?;
    let mut script = String::new();
    let _ = writeln!(script, "set terminal svg size 500,200");
    let _ = writeln!(
        script,
        "set title \"Memory of {}\"",
        gnuplot_quote(&job.wrapper_arguments.job_id)
    );
    let _ = writeln!(script, "set xdata time");
    let _ = writeln!(script, "set timefmt \"%Y-%m-%dT%H:%M:%SZ\"");
    let _ = writeln!(script, "set format x \"%H:%M:%S\"");
    let _ = writeln!(
        script,
        "plot '-' using 1:2 with lines title \"rss\", \
         '-' using 1:2 with lines title \"vsz\""
    );
    for sample in trace {
        let _ = writeln!(script, "{} {}", sample.time, sample.rss);
    }
    let _ = writeln!(script, "e");
    for sample in trace {
        let _ = writeln!(script, "{} {}", sample.time, sample.vsz);
    }
    let _ = writeln!(script, "e");
    Some(script)
}

fn should_render_memory_trace(job: &JobRecord) -> bool {
    job.memory_trace
        .trace
        .as_ref()
        .is_some_and(|trace| trace.len() > 2)
}

/// The dashboard graphs: one section per kind, each holding rendered SVG
/// documents.
fn dashboard_svgs(run: &Run, tools: &ToolBox) -> Vec<(String, Vec<Vec<String>>)> {
    if !tools.gnuplot {
        return Vec::new();
    }

    let mut sections = Vec::new();

    let runtime_groups = stats_groups(run, |job| job.duration.is_some());
    let mut runtime_svgs = Vec::new();
    for (name, jobs) in runtime_groups {
        if jobs.len() < 2 {
            continue;
        }
        let values: Vec<(String, f64)> = jobs
            .iter()
            .map(|job| (job_label(job), job.duration.unwrap_or(0) as f64))
            .collect();
        match run_gnuplot(&bars_script(&format!("Runtime: {name}"), &values)) {
            Ok(svg) => runtime_svgs.push(svg),
            Err(err) => tracing::warn!("skipping runtime graph for '{name}': {err:#}"),
        }
    }
    sections.push(("Runtime".to_string(), runtime_svgs));

    let memory_groups = stats_groups(run, |job| {
        job.memory_trace.peak.as_ref().is_some_and(|p| p.rss > 0)
    });
    let mut memory_svgs = Vec::new();
    for (name, jobs) in memory_groups {
        if jobs.len() < 2 {
            continue;
        }
        let values: Vec<(String, f64)> = jobs
            .iter()
            .map(|job| {
                let rss = job.memory_trace.peak.as_ref().map(|p| p.rss).unwrap_or(0);
                (job_label(job), rss as f64)
            })
            .collect();
        match run_gnuplot(&bars_script(&format!("Peak memory: {name}"), &values)) {
            Ok(svg) => memory_svgs.push(svg),
            Err(err) => tracing::warn!("skipping memory graph for '{name}': {err:#}"),
        }
    }
    sections.push(("Memory Usage".to_string(), memory_svgs));

    let mut parallelism_svgs = Vec::new();
    if let Some(trace) = &run.fields.parallelism.trace {
        if !trace.is_empty() {
            let bucketed = process_trace(trace);
            match run_gnuplot(&parallelism_script(run, &bucketed)) {
                Ok(svg) => parallelism_svgs.push(svg),
                Err(err) => tracing::warn!("skipping parallelism graph: {err:#}"),
            }
        }
    }
    sections.push(("Parallelism".to_string(), parallelism_svgs));

    sections
}

fn job_label(job: &JobRecord) -> String {
    job.wrapper_arguments
        .description
        .clone()
        .unwrap_or_else(|| job.wrapper_arguments.job_id.clone())
}

// ---------------------------------------------------------------------------
// HTML pages

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        escape_html(title)
    )
}

fn summary_counts(run: &Run) -> (usize, usize, usize, usize) {
    let (mut total, mut success, mut fail, mut in_progress) = (0, 0, 0, 0);
    for pipe in &run.pipelines {
        total += 1;
        match pipe.status {
            RunStatus::Success => success += 1,
            RunStatus::Fail => fail += 1,
            RunStatus::InProgress => in_progress += 1,
        }
    }
    (total, success, fail, in_progress)
}

fn dashboard_page(run: &Run, svgs: &[(String, Vec<Vec<String>>)]) -> String {
    let (total, success, fail, in_progress) = summary_counts(run);
    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", escape_html(&run.fields.project));
    let _ = writeln!(
        body,
        "<p>run <code>{}</code> &mdash; {}</p>",
        escape_html(&run.fields.run_id),
        run.fields.status.as_str()
    );
    let _ = writeln!(
        body,
        "<p>{total} pipelines: {success} succeeded, {fail} failed, {in_progress} in progress</p>"
    );
    let _ = writeln!(
        body,
        "<p>started {}{}</p>",
        escape_html(&run.fields.start_time),
        run.fields
            .end_time
            .as_deref()
            .map(|end| format!(", finished {}", escape_html(end)))
            .unwrap_or_default()
    );
    if let Ok(archive) = std::env::var("LITANI_REPORT_ARCHIVE_PATH") {
        let _ = writeln!(
            body,
            "<p>archived reports: <code>{}</code></p>",
            escape_html(&archive)
        );
    }

    let _ = writeln!(body, "<table>");
    let _ = writeln!(body, "<tr><th>pipeline</th><th>status</th></tr>");
    for pipe in &run.pipelines {
        let _ = writeln!(
            body,
            "<tr><td><a href=\"{url}/index.html\">{name}</a></td><td>{status}</td></tr>",
            url = escape_html(&pipe.url),
            name = escape_html(&pipe.name),
            status = pipe.status.as_str()
        );
    }
    let _ = writeln!(body, "</table>");

    for (section, section_svgs) in svgs {
        if section_svgs.is_empty() {
            continue;
        }
        let _ = writeln!(body, "<h2>{}</h2>", escape_html(section));
        for svg in section_svgs {
            let _ = writeln!(body, "{}", svg.join("\n"));
        }
    }

    let _ = writeln!(
        body,
        "<p><small>litani {}</small></p>",
        escape_html(&run.fields.version)
    );
    page(&run.fields.project, &body)
}

fn render_pipeline(fresh_dir: &Path, pipe: &Pipeline, tools: &ToolBox) -> anyhow::Result<()> {
    let pipe_dir = fresh_dir.join(&pipe.url);
    std::fs::create_dir_all(&pipe_dir)?;

    let mut depgraph = None;
    if tools.graphviz {
        let out_file = pipe_dir.join("dependencies.svg");
        match run_graphviz(&graph::pipeline_graph(pipe), &out_file) {
            Ok(()) => depgraph = Some("dependencies.svg".to_string()),
            Err(err) => tracing::warn!(
                "skipping dependency graph for pipeline '{}': {err:#}",
                pipe.name
            ),
        }
    }

    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", escape_html(&pipe.name));
    let _ = writeln!(body, "<p>status: {}</p>", pipe.status.as_str());
    if let Some(svg) = &depgraph {
        let _ = writeln!(body, "<p><a href=\"{svg}\">dependency graph</a></p>");
    }

    for stage in &pipe.ci_stages {
        let _ = writeln!(
            body,
            "<h2>{} &mdash; {} ({}%)</h2>",
            escape_html(&stage.name),
            stage.status.as_str(),
            stage.progress
        );
        if stage.jobs.is_empty() {
            continue;
        }
        let _ = writeln!(body, "<table>");
        let _ = writeln!(
            body,
            "<tr><th>job</th><th>outcome</th><th>duration</th></tr>"
        );
        for job in &stage.jobs {
            let mut extras = String::new();

            if job.complete && job.loaded_outcome_dict.is_some() {
                let job_dir = pipe_dir.join(&job.wrapper_arguments.job_id);
                write_outcome_pages(&job_dir, job)?;
                let _ = write!(
                    extras,
                    " <a href=\"{}/outcome.html\">outcome table</a>",
                    escape_html(&job.wrapper_arguments.job_id)
                );
            }

            let _ = writeln!(
                body,
                "<tr><td>{label}{extras}</td><td>{outcome}</td><td>{duration}</td></tr>",
                label = escape_html(&job_label(job)),
                outcome = job.outcome.map(|o| o.as_str()).unwrap_or("in progress"),
                duration = job
                    .duration_str
                    .as_deref()
                    .map(escape_html)
                    .unwrap_or_default()
            );

            if tools.gnuplot && should_render_memory_trace(job) {
                if let Some(script) = memory_trace_script(job) {
                    match run_gnuplot(&script) {
                        Ok(svg) => {
                            let _ = writeln!(
                                body,
                                "<tr><td colspan=\"3\">{}</td></tr>",
                                svg.join("\n")
                            );
                        }
                        Err(err) => tracing::warn!(
                            "skipping memory trace for job '{}': {err:#}",
                            job.wrapper_arguments.job_id
                        ),
                    }
                }
            }
        }
        let _ = writeln!(body, "</table>");
    }

    atomic_write(&pipe_dir.join("index.html"), page(&pipe.name, &body))
}

fn write_outcome_pages(job_dir: &Path, job: &JobRecord) -> anyhow::Result<()> {
    let Some(table) = &job.loaded_outcome_dict else {
        return Ok(());
    };
    std::fs::create_dir_all(job_dir)?;
    atomic_write(
        &job_dir.join("outcome.json"),
        serde_json::to_string_pretty(table)?,
    )?;

    let mut body = String::new();
    let _ = writeln!(
        body,
        "<h1>Outcome table for {}</h1>",
        escape_html(&job.wrapper_arguments.job_id)
    );
    let _ = writeln!(
        body,
        "<pre>{}</pre>",
        escape_html(&serde_json::to_string_pretty(table)?)
    );
    atomic_write(&job_dir.join("outcome.html"), page("Outcome table", &body))
}

/// Synthesize a directory listing for every artifact directory that did
/// not produce its own `index.html`.
fn render_artifact_indexes(artifact_dir: &Path) -> anyhow::Result<()> {
    let mut needing_index: Vec<(PathBuf, Vec<String>, Vec<String>)> = Vec::new();

    let mut stack = vec![artifact_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                stack.push(entry.path());
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        if !files.iter().any(|f| f == "index.html") {
            dirs.sort();
            files.sort();
            needing_index.push((dir, dirs, files));
        }
    }

    for (dir, subdirs, files) in needing_index {
        let mut body = String::new();
        let _ = writeln!(body, "<h1>{}</h1>", escape_html(&dir.display().to_string()));
        let _ = writeln!(body, "<ul>");
        for sub in &subdirs {
            let _ = writeln!(
                body,
                "<li><a href=\"{0}/index.html\">{0}/</a></li>",
                escape_html(sub)
            );
        }
        for file in &files {
            let _ = writeln!(body, "<li><a href=\"{0}\">{0}</a></li>", escape_html(file));
        }
        let _ = writeln!(body, "</ul>");
        atomic_write(&dir.join("index.html"), page("Artifacts", &body))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: &str, running: u64, finished: u64, total: u64) -> ParallelismSample {
        ParallelismSample {
            time: time.to_string(),
            running,
            finished,
            total,
        }
    }

    #[test]
    fn trace_buckets_take_min_finished_and_max_running() {
        let trace = vec![
            sample("2026-03-01T09:00:01.900000Z", 4, 2, 10),
            sample("2026-03-01T09:00:01.100000Z", 2, 1, 10),
            sample("2026-03-01T09:00:00.500000Z", 1, 0, 10),
            sample("2026-03-01T09:00:01.500000Z", 3, 3, 10),
        ];
        let bucketed = process_trace(&trace);
        assert_eq!(bucketed.len(), 2);
        assert_eq!(bucketed[0].time, "2026-03-01T09:00:00Z");
        assert_eq!(bucketed[1].time, "2026-03-01T09:00:01Z");
        assert_eq!(bucketed[1].running, 4);
        assert_eq!(bucketed[1].finished, 1);
        assert_eq!(bucketed[1].total, 10);
    }

    fn run_with_tagged_jobs(tags: Vec<Option<Vec<&str>>>) -> Run {
        let jobs: Vec<serde_json::Value> = tags
            .into_iter()
            .enumerate()
            .map(|(idx, tags)| {
                serde_json::json!({
                    "complete": true,
                    "duration": 3,
                    "duration_str": "03s",
                    "wrapper_arguments": {
                        "job_id": format!("job-{idx}"),
                        "command": "true",
                        "pipeline_name": "pipe",
                        "ci_stage": "build",
                        "tags": tags,
                    },
                })
            })
            .collect();

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
            "status": "success",
            "aux": {},
            "parallelism": {},
            "latest_symlink": null,
            "pipelines": [{
                "name": "pipe",
                "url": "pipelines/pipe",
                "status": "success",
                "ci_stages": [{
                    "name": "build",
                    "url": "artifacts/pipe/build",
                    "status": "success",
                    "progress": 100,
                    "complete": true,
                    "jobs": jobs,
                }],
            }],
        }))
        .unwrap()
    }

    #[test]
    fn stats_groups_collect_by_tag_value() {
        let run = run_with_tagged_jobs(vec![
            Some(vec!["stats-group:alpha"]),
            Some(vec!["other:tag", "stats-group:alpha"]),
            Some(vec!["stats-group:beta"]),
            Some(vec!["stats-group"]),
            None,
        ]);
        let groups = stats_groups(&run, |_| true);
        let names: Vec<&str> = groups.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn stats_groups_respect_the_filter() {
        let run = run_with_tagged_jobs(vec![
            Some(vec!["stats-group:alpha"]),
            Some(vec!["stats-group:alpha"]),
        ]);
        let groups = stats_groups(&run, |_| false);
        assert!(groups.is_empty());
    }

    #[test]
    fn artifact_indexes_fill_gaps_only() {
        let dir = tempfile::tempdir().unwrap();
        let owned = dir.path().join("owned");
        let bare = dir.path().join("bare/nested");
        std::fs::create_dir_all(&owned).unwrap();
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::write(owned.join("index.html"), "custom").unwrap();
        std::fs::write(bare.join("log.txt"), "log").unwrap();

        render_artifact_indexes(dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(owned.join("index.html")).unwrap(),
            "custom"
        );
        let generated = std::fs::read_to_string(bare.join("index.html")).unwrap();
        assert!(generated.contains("log.txt"));
        assert!(std::fs::read_to_string(dir.path().join("index.html"))
            .unwrap()
            .contains("bare"));
    }

    #[test]
    fn publication_swaps_symlink_and_expires_the_old_tree() {
        let cache = tempfile::tempdir().unwrap();
        let data = paths::report_data_dir(cache.path());

        let first = data.join("first");
        std::fs::create_dir_all(&first).unwrap();
        publish(cache.path(), &first).unwrap();

        let html = paths::report_dir(cache.path());
        assert_eq!(std::fs::read_link(&html).unwrap(), first);
        // Publication released the fresh directory's lock.
        assert!(LockableDirectory::new(&first).acquire());
        LockableDirectory::new(&first).release().unwrap();

        let second = data.join("second");
        std::fs::create_dir_all(&second).unwrap();
        publish(cache.path(), &second).unwrap();

        assert_eq!(std::fs::read_link(&html).unwrap(), second);
        // The old tree was expired and, being unlocked, collected.
        assert!(!first.exists());
        assert!(second.exists());
    }

    #[test]
    fn published_run_json_round_trips() {
        let cache = tempfile::tempdir().unwrap();
        let run = run_with_tagged_jobs(vec![Some(vec!["stats-group:alpha"]), None]);

        render(&run, cache.path()).unwrap();

        let html = paths::report_dir(cache.path());
        let raw = std::fs::read_to_string(html.join(RUN_FILE)).unwrap();
        let reread: Run = serde_json::from_str(&raw).unwrap();
        assert_eq!(reread, run);
        assert!(html.join("index.html").exists());
        assert!(html.join("pipelines/pipe/index.html").exists());
        assert!(html.join("artifacts/index.html").exists());
    }

    #[test]
    fn gc_skips_locked_directories() {
        let cache = tempfile::tempdir().unwrap();
        let data = paths::report_data_dir(cache.path());
        let held = data.join("held");
        std::fs::create_dir_all(&held).unwrap();
        // Expired but locked (no sentinel): must survive.
        ExpirableDirectory::new(&held).expire().unwrap();

        unlink_expired(cache.path()).unwrap();
        assert!(held.exists());

        // Released: the next sweep may collect it.
        LockableDirectory::new(&held).release().unwrap();
        unlink_expired(cache.path()).unwrap();
        assert!(!held.exists());
    }
}
