//! The `run-build` subcommand: fuse the job shards, materialize the Ninja
//! graph, drive the scheduler, aggregate the results, and publish the
//! report.
//!
//! While the scheduler runs, a signal task answers `dump-run` requests by
//! writing an aggregated snapshot of the current state; `dump-run` and
//! this process rendezvous through the PID file and `dumped-run.json`.

use tokio::signal::unix::{signal, SignalKind};

use litani_core::model::RunStatus;
use litani_core::{paths, pid, store, time};
use litani_engine::driver::Driver;
use litani_engine::{aggregate, ninja, report, snapshot};

use crate::cli::RunBuildArgs;

const NINJA_FILE: &str = "litani.ninja";

pub async fn run_build(args: RunBuildArgs) -> anyhow::Result<i32> {
    let cache_dir = paths::find_cache_dir()?;

    let cache = store::add_jobs_to_cache(&cache_dir)?;
    let ninja_file = cache_dir.join(NINJA_FILE);
    ninja::write_ninja_file(&ninja_file, &cache)?;

    pid::write(&cache_dir)?;
    let mut dump_signal = signal(SignalKind::user_defined1())?;
    let signal_cache_dir = cache_dir.clone();
    let dump_task = tokio::spawn(async move {
        loop {
            if dump_signal.recv().await.is_none() {
                break;
            }
            if let Err(err) = snapshot::write_snapshot(&signal_cache_dir) {
                tracing::warn!("failed to write run snapshot: {err:#}");
            }
        }
    });

    let driver = Driver {
        ninja_file,
        dry_run: args.dry_run,
        parallelism: args.parallel,
        pipelines: args.pipelines,
        ci_stage: args.ci_stage,
    };
    let outcome = driver.run().await;
    dump_task.abort();
    let outcome = outcome?;

    if !outcome.success {
        tracing::warn!("scheduler reported at least one failed job");
    }

    let mut cache = store::read_cache(&cache_dir)?;
    cache.fields.parallelism = outcome.parallelism;
    cache.fields.end_time = Some(time::now_str());
    store::write_cache(&cache_dir, &cache)?;

    let run = aggregate::get_run_data(&cache_dir)?;
    report::render(&run, &cache_dir)?;
    println!(
        "Report was rendered at {}/index.html",
        paths::report_dir(&cache_dir).display()
    );

    Ok(if run.fields.status == RunStatus::Success {
        0
    } else {
        1
    })
}
