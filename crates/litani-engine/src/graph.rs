//! Exporting the job graph as a Graphviz DOT digraph.
//!
//! Jobs render as HTML-table nodes and files as plain labelled nodes, so
//! the two escaping rules differ: HTML labels escape `& " < >`, plain
//! attribute values escape `"` and `;`.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash as _, Hasher as _};

use litani_core::model::{Outcome, Pipeline, Run};

const LINE_WIDTH: usize = 40;

const COLOR_SUCCESS: &str = "#90caf9";
const COLOR_FAIL_IGNORED: &str = "#ffecb3";
const COLOR_FAIL: &str = "#ef9a9a";
const COLOR_INCOMPLETE: &str = "#eceff1";

/// Escape a DOT attribute value.
fn escape(value: &str) -> String {
    value.replace('"', "\\\"").replace(';', "\\;")
}

/// Escape text embedded in an HTML-like label.
fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while !word.is_empty() {
            let space = if current.is_empty() { 0 } else { 1 };
            let room = width.saturating_sub(current.len() + space);
            if word.len() <= room {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                break;
            }
            if current.is_empty() {
                let split = word
                    .char_indices()
                    .take_while(|(i, _)| *i < width)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(word.len());
                current.push_str(&word[..split]);
                word = &word[split..];
            }
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn wrap_html(text: &str) -> String {
    wrap(&html_escape(text), LINE_WIDTH).join("<BR/>")
}

fn node_id(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn fill_color(complete: bool, outcome: Option<Outcome>) -> &'static str {
    if !complete {
        return COLOR_INCOMPLETE;
    }
    match outcome {
        Some(Outcome::Success) => COLOR_SUCCESS,
        Some(Outcome::FailIgnored) => COLOR_FAIL_IGNORED,
        Some(Outcome::Fail) => COLOR_FAIL,
        None => COLOR_INCOMPLETE,
    }
}

fn command_node(
    complete: bool,
    outcome: Option<Outcome>,
    pipeline_name: &str,
    description: Option<&str>,
    command: &str,
) -> (u64, String) {
    let id = node_id(command);
    let desc_cell = match description {
        Some(desc) if !desc.is_empty() => {
            format!("\n<TD><B>{}</B></TD>", wrap_html(desc))
        }
        _ => String::new(),
    };
    let rendered = format!(
        "\"{id}\" [label=<\n\
         \x20   <TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\">\n\
         \x20       <TR>\n\
         \x20           <TD><B>{pipeline}</B></TD>{desc_cell}\n\
         \x20       </TR>\n\
         \x20       <TR>\n\
         \x20           <TD COLSPAN=\"2\">{command}</TD>\n\
         \x20       </TR>\n\
         \x20   </TABLE>> shape=\"plain\",style=\"filled\",fillcolor=\"{color}\"];",
        pipeline = wrap_html(pipeline_name),
        command = wrap_html(command),
        color = escape(fill_color(complete, outcome)),
    );
    (id, rendered)
}

fn file_node(path: &str) -> (u64, String) {
    let id = node_id(path);
    let name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    let label = wrap(&name, LINE_WIDTH).join("\\n");
    (id, format!("\"{id}\" [\"label\"=\"{}\"];", escape(&label)))
}

/// The job graph of a whole run, optionally restricted to some pipelines.
pub fn run_graph(run: &Run, pipelines: &[String]) -> String {
    let jobs = run
        .pipelines
        .iter()
        .filter(|pipe| pipelines.is_empty() || pipelines.contains(&pipe.name))
        .flat_map(|pipe| pipe.ci_stages.iter())
        .flat_map(|stage| stage.jobs.iter());

    let mut nodes: BTreeMap<u64, String> = BTreeMap::new();
    let mut edges: BTreeSet<(u64, u64)> = BTreeSet::new();

    for job in jobs {
        let args = &job.wrapper_arguments;
        let (cmd_id, rendered) = command_node(
            job.complete,
            job.outcome,
            &args.pipeline_name,
            args.description.as_deref(),
            &args.command,
        );
        nodes.insert(cmd_id, rendered);

        for input in args.inputs.iter().flatten() {
            let (file_id, rendered) = file_node(input);
            nodes.insert(file_id, rendered);
            edges.insert((file_id, cmd_id));
        }
        for output in args.outputs.iter().flatten() {
            let (file_id, rendered) = file_node(output);
            nodes.insert(file_id, rendered);
            edges.insert((cmd_id, file_id));
        }
    }

    render_digraph(&nodes, &edges)
}

/// The dependency graph of a single pipeline, as embedded in its report
/// page.
pub fn pipeline_graph(pipe: &Pipeline) -> String {
    let mut nodes: BTreeMap<u64, String> = BTreeMap::new();
    let mut edges: BTreeSet<(u64, u64)> = BTreeSet::new();

    for stage in &pipe.ci_stages {
        for job in &stage.jobs {
            let args = &job.wrapper_arguments;
            let (cmd_id, rendered) = command_node(
                job.complete,
                job.outcome,
                &args.pipeline_name,
                args.description.as_deref(),
                &args.command,
            );
            nodes.insert(cmd_id, rendered);
            for input in args.inputs.iter().flatten() {
                let (file_id, rendered) = file_node(input);
                nodes.insert(file_id, rendered);
                edges.insert((file_id, cmd_id));
            }
            for output in args.outputs.iter().flatten() {
                let (file_id, rendered) = file_node(output);
                nodes.insert(file_id, rendered);
                edges.insert((cmd_id, file_id));
            }
        }
    }

    render_digraph(&nodes, &edges)
}

fn render_digraph(nodes: &BTreeMap<u64, String>, edges: &BTreeSet<(u64, u64)>) -> String {
    let mut buf = vec!["digraph G {".to_string(), "bgcolor=\"transparent\"".to_string()];
    buf.extend(nodes.values().map(|n| format!("  {n}")));
    buf.extend(
        edges
            .iter()
            .map(|(src, dst)| format!("  \"{src}\" -> \"{dst}\" [];")),
    );
    buf.push("}".to_string());
    buf.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_job(complete: bool, outcome: serde_json::Value) -> Run {
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
                    "jobs": [{
                        "complete": complete,
                        "duration_str": null,
                        "outcome": outcome,
                        "wrapper_arguments": {
                            "job_id": "j",
                            "command": "cc -o \"out bin\" <main.c> & echo done",
                            "pipeline_name": "pipe",
                            "description": "build & link",
                            "ci_stage": "build",
                            "inputs": ["main.c"],
                            "outputs": ["bin"],
                        },
                    }],
                }],
            }],
        }))
        .unwrap()
    }

    #[test]
    fn html_labels_escape_markup_characters() {
        let dot = run_graph(&run_with_job(false, serde_json::Value::Null), &[]);
        assert!(dot.contains("&lt;main.c&gt;"));
        assert!(dot.contains("&amp; echo done"));
        assert!(dot.contains("&quot;out bin&quot;"));
        assert!(dot.contains("build &amp; link"));
        assert!(!dot.contains("<main.c>"));
    }

    #[test]
    fn incomplete_jobs_render_grey() {
        let dot = run_graph(&run_with_job(false, serde_json::Value::Null), &[]);
        assert!(dot.contains(COLOR_INCOMPLETE));
    }

    #[test]
    fn outcome_controls_fill_color() {
        for (outcome, color) in [
            ("success", COLOR_SUCCESS),
            ("fail_ignored", COLOR_FAIL_IGNORED),
            ("fail", COLOR_FAIL),
        ] {
            let dot = run_graph(&run_with_job(true, serde_json::json!(outcome)), &[]);
            assert!(dot.contains(color), "expected {color} for {outcome}");
        }
    }

    #[test]
    fn files_connect_to_their_jobs() {
        let run = run_with_job(false, serde_json::Value::Null);
        let dot = run_graph(&run, &[]);
        let cmd = node_id("cc -o \"out bin\" <main.c> & echo done");
        let input = node_id("main.c");
        let output = node_id("bin");
        assert!(dot.contains(&format!("\"{input}\" -> \"{cmd}\" [];")));
        assert!(dot.contains(&format!("\"{cmd}\" -> \"{output}\" [];")));
    }

    #[test]
    fn pipeline_filter_excludes_other_pipelines() {
        let run = run_with_job(false, serde_json::Value::Null);
        let all = run_graph(&run, &[]);
        let none = run_graph(&run, &["other".to_string()]);
        assert!(all.contains("TABLE"));
        assert!(!none.contains("TABLE"));
    }

    #[test]
    fn wrap_breaks_long_words() {
        let lines = wrap("aaaaabbbbbccccc", 5);
        assert_eq!(lines, vec!["aaaaa", "bbbbb", "ccccc"]);
        let lines = wrap("one two three", 8);
        assert_eq!(lines, vec!["one two", "three"]);
    }

    #[test]
    fn attribute_escaping_covers_quotes_and_semicolons() {
        assert_eq!(escape("a\"b;c"), "a\\\"b\\;c");
    }
}
