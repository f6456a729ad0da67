//! Locating the run's cache directory through `.litani_cache_dir` pointer
//! files.

use std::path::{Path, PathBuf};

use crate::CACHE_POINTER;

#[derive(Debug, thiserror::Error)]
#[error("could not find a pointer to a litani cache; did you forget to run `litani init`?")]
pub struct MissingCache;

/// Resolve the cache directory, searching `start` and its ancestors first
/// and falling back to a depth-first walk of `start`'s descendants. The
/// first readable pointer whose target directory exists wins.
///
/// The descending fallback is surprising but long-standing behavior: it
/// lets `litani` commands work from a sibling checkout above the directory
/// that ran `init`. The walk is unbounded, so very deep trees make a
/// missing pointer expensive to report.
pub fn get_cache_dir(start: &Path) -> Result<PathBuf, MissingCache> {
    for dir in start.ancestors() {
        if let Some(cache) = check_pointer(dir) {
            return Ok(cache);
        }
    }

    let mut stack = vec![start.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // Unreadable candidate directories are skipped silently.
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(cache) = check_pointer(&path) {
                    return Ok(cache);
                }
                stack.push(path);
            }
        }
    }

    Err(MissingCache)
}

/// Resolve the cache directory starting from the current directory.
pub fn find_cache_dir() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(get_cache_dir(&cwd)?)
}

fn check_pointer(dir: &Path) -> Option<PathBuf> {
    let pointer = dir.join(CACHE_POINTER);
    tracing::debug!("searching for cache pointer in {}", dir.display());
    let contents = std::fs::read_to_string(&pointer).ok()?;
    let cache = PathBuf::from(contents.trim());
    if cache.exists() {
        tracing::debug!("cache is at {}", cache.display());
        return Some(cache);
    }
    tracing::warn!(
        "found a cache pointer at {} pointing to {}, but that directory does not exist; \
         continuing search",
        pointer.display(),
        cache.display()
    );
    None
}

pub fn jobs_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join(crate::JOBS_DIR)
}

pub fn status_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("status")
}

pub fn artifacts_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("artifacts")
}

pub fn report_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("html")
}

pub fn report_data_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("report_data")
}
