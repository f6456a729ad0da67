//! The run-pid rendezvous file.
//!
//! `run-build` writes its own PID here so that `dump-run` can signal it
//! from another process.

use std::path::Path;

use anyhow::Context as _;

use crate::atomic::atomic_write;

const NAME: &str = "run-pid";

pub fn write(cache_dir: &Path) -> anyhow::Result<()> {
    atomic_write(&cache_dir.join(NAME), format!("{}\n", std::process::id()))
}

pub fn read(cache_dir: &Path) -> anyhow::Result<i32> {
    let path = cache_dir.join(NAME);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("no run-build PID file at {}", path.display()))?;
    Ok(raw.trim().parse()?)
}
