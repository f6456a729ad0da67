//! Handlers for the single-shot subcommands.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use uuid::Uuid;

use litani_core::atomic::atomic_write;
use litani_core::model::{Cache, Parallelism, RunFields, RunStatus};
use litani_core::{paths, store, time};
use litani_core::{CACHE_POINTER, DEFAULT_STAGES};
use litani_engine::{aggregate, graph, snapshot, wrapper};

use crate::cli::{DumpRunArgs, ExecArgs, InitArgs, JobArgs, PrintGraphArgs};

pub fn init(args: InitArgs) -> anyhow::Result<()> {
    let run_id = Uuid::new_v4().to_string();

    let (cache_dir, latest_symlink) = match args.output_directory {
        Some(dir) => (dir, None),
        None => {
            let prefix = args
                .output_prefix
                .unwrap_or_else(|| std::env::temp_dir().join("litani/runs"));
            let cache_dir = prefix.join(&run_id);
            let symlink = args
                .output_symlink
                .unwrap_or_else(|| prefix.join("latest"));
            (cache_dir, Some(symlink))
        }
    };
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("creating cache directory {}", cache_dir.display()))?;

    if let Some(symlink) = &latest_symlink {
        point_symlink(symlink, &cache_dir)?;
    }

    let stages = if args.stages.is_empty() {
        DEFAULT_STAGES.iter().map(|s| s.to_string()).collect()
    } else {
        args.stages
    };

    let cache = Cache {
        fields: RunFields {
            run_id,
            project: args.project,
            stages,
            pools: args.pools.into_iter().collect::<BTreeMap<_, _>>(),
            start_time: time::now_str(),
            end_time: None,
            version: litani_core::version_string(),
            version_major: litani_core::VERSION_MAJOR,
            version_minor: litani_core::VERSION_MINOR,
            version_patch: litani_core::VERSION_PATCH,
            release_candidate: litani_core::RELEASE_CANDIDATE,
            status: RunStatus::InProgress,
            aux: serde_json::Map::new(),
            parallelism: Parallelism::default(),
            latest_symlink: latest_symlink.map(|p| p.display().to_string()),
        },
        jobs: Vec::new(),
    };
    store::write_cache(&cache_dir, &cache)?;

    let pointer = std::env::current_dir()?.join(CACHE_POINTER);
    atomic_write(&pointer, format!("{}\n", cache_dir.display()))?;

    tracing::info!("run directory: {}", cache_dir.display());
    Ok(())
}

/// Swap a symlink to a new target through a temporary sibling, so readers
/// never see it missing.
fn point_symlink(symlink: &Path, target: &Path) -> anyhow::Result<()> {
    if let Some(parent) = symlink.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = symlink.with_file_name(format!(
        "{}~{}",
        symlink
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "latest".to_string()),
        Uuid::new_v4()
    ));
    std::os::unix::fs::symlink(target, &temp)?;
    std::fs::rename(&temp, symlink)?;
    Ok(())
}

pub fn add_job(args: JobArgs) -> anyhow::Result<()> {
    let cache_dir = paths::find_cache_dir()?;
    let spec = args.into_spec(Uuid::new_v4().to_string())?;

    let cache = store::read_cache(&cache_dir)?;
    if !cache.fields.stages.contains(&spec.ci_stage) {
        anyhow::bail!(
            "ci stage '{}' is not one of this run's stages {:?}",
            spec.ci_stage,
            cache.fields.stages
        );
    }
    if let Some(pool) = &spec.pool {
        if !cache.fields.pools.contains_key(pool) {
            anyhow::bail!("pool '{pool}' was not declared at init time");
        }
    }

    store::write_shard(&cache_dir, &spec)
}

pub async fn exec(args: ExecArgs) -> anyhow::Result<i32> {
    let cache_dir = paths::find_cache_dir()?;
    let spec = match args.job_id {
        Some(job_id) => store::read_shard(&cache_dir, &job_id)?,
        None => args.job.into_spec(Uuid::new_v4().to_string())?,
    };

    let record = wrapper::run_job(&cache_dir, spec).await?;
    Ok(record.wrapper_return_code.unwrap_or(1))
}

pub async fn dump_run(args: DumpRunArgs) -> anyhow::Result<()> {
    let cache_dir = paths::find_cache_dir()?;
    match snapshot::dump_run(&cache_dir, args.retries).await? {
        Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
        None => println!("null"),
    }
    Ok(())
}

pub fn print_graph(args: PrintGraphArgs) -> anyhow::Result<()> {
    let cache_dir = paths::find_cache_dir()?;
    store::add_jobs_to_cache(&cache_dir)?;
    let run = aggregate::get_run_data(&cache_dir)?;
    println!("{}", graph::run_graph(&run, &args.pipelines));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_args(dir: &Path) -> InitArgs {
        InitArgs {
            project: "proj".to_string(),
            stages: Vec::new(),
            pools: vec![("slow".to_string(), 1)],
            output_directory: Some(dir.to_path_buf()),
            output_prefix: None,
            output_symlink: None,
        }
    }

    #[test]
    fn init_writes_skeleton_and_pointer() {
        let scratch = tempfile::tempdir().unwrap();
        let cwd = scratch.path().join("work");
        std::fs::create_dir_all(&cwd).unwrap();
        let cache_dir = scratch.path().join("cache");

        // init writes the pointer into the current directory.
        let old_cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(&cwd).unwrap();
        let result = init(init_args(&cache_dir));
        std::env::set_current_dir(old_cwd).unwrap();
        result.unwrap();

        let cache = store::read_cache(&cache_dir).unwrap();
        assert_eq!(cache.fields.project, "proj");
        assert_eq!(
            cache.fields.stages,
            vec!["build".to_string(), "test".to_string(), "report".to_string()]
        );
        assert_eq!(cache.fields.pools.get("slow"), Some(&1));
        assert_eq!(cache.fields.status, RunStatus::InProgress);
        assert!(cache.jobs.is_empty());

        let pointer = std::fs::read_to_string(cwd.join(CACHE_POINTER)).unwrap();
        assert_eq!(pointer.trim(), cache_dir.display().to_string());
        assert_eq!(paths::get_cache_dir(&cwd).unwrap(), cache_dir);
    }

    #[test]
    fn symlink_swap_replaces_existing_link() {
        let scratch = tempfile::tempdir().unwrap();
        let link = scratch.path().join("latest");
        let a = scratch.path().join("a");
        let b = scratch.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        point_symlink(&link, &a).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), a);
        point_symlink(&link, &b).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), b);
    }
}
