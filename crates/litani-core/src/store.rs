//! The job store: one JSON shard per job, fused into `cache.json` by the
//! single `run-build` process.
//!
//! Concurrent `add-job` invocations are safe because each writes a
//! distinct shard; only the run driver performs the fusion, and it does so
//! once, before any job starts.

use std::path::Path;

use anyhow::Context as _;

use crate::atomic::atomic_write;
use crate::model::{Cache, JobSpec};
use crate::paths;
use crate::CACHE_FILE;

pub fn read_cache(cache_dir: &Path) -> anyhow::Result<Cache> {
    let path = cache_dir.join(CACHE_FILE);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading run cache {}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn write_cache(cache_dir: &Path, cache: &Cache) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(cache)?;
    atomic_write(&cache_dir.join(CACHE_FILE), json)
}

/// Write one job shard. Each `job_id` may be added exactly once.
pub fn write_shard(cache_dir: &Path, spec: &JobSpec) -> anyhow::Result<()> {
    let dir = paths::jobs_dir(cache_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", spec.job_id));
    if path.exists() {
        anyhow::bail!("a job with ID '{}' has already been added", spec.job_id);
    }
    atomic_write(&path, serde_json::to_string_pretty(spec)?)
}

/// Load the spec for a single job from its shard.
pub fn read_shard(cache_dir: &Path, job_id: &str) -> anyhow::Result<JobSpec> {
    let path = paths::jobs_dir(cache_dir).join(format!("{job_id}.json"));
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("no shard for job '{job_id}' at {}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Fuse every shard in the jobs directory into the cache file. Shard
/// enumeration order is not meaningful; the aggregator imposes ordering
/// later.
pub fn add_jobs_to_cache(cache_dir: &Path) -> anyhow::Result<Cache> {
    let mut jobs = Vec::new();
    let jobs_dir = paths::jobs_dir(cache_dir);
    if jobs_dir.exists() {
        for entry in std::fs::read_dir(&jobs_dir)? {
            let path = entry?.path();
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading job shard {}", path.display()))?;
            jobs.push(serde_json::from_str(&raw)?);
        }
    }

    let mut cache = read_cache(cache_dir)?;
    cache.jobs = jobs;
    write_cache(cache_dir, &cache)?;
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::{Parallelism, RunFields, RunStatus};

    fn spec(job_id: &str) -> JobSpec {
        serde_json::from_value(serde_json::json!({
            "job_id": job_id,
            "command": "true",
            "pipeline_name": "pipe",
            "ci_stage": "build",
        }))
        .unwrap()
    }

    fn skeleton() -> Cache {
        Cache {
            fields: RunFields {
                run_id: "run".into(),
                project: "proj".into(),
                stages: vec!["build".into()],
                pools: BTreeMap::new(),
                start_time: "2026-03-01T09:00:00Z".into(),
                end_time: None,
                version: crate::version_string(),
                version_major: crate::VERSION_MAJOR,
                version_minor: crate::VERSION_MINOR,
                version_patch: crate::VERSION_PATCH,
                release_candidate: crate::RELEASE_CANDIDATE,
                status: RunStatus::InProgress,
                aux: serde_json::Map::new(),
                parallelism: Parallelism::default(),
                latest_symlink: None,
            },
            jobs: Vec::new(),
        }
    }

    #[test]
    fn fusion_contains_every_shard_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        write_cache(dir.path(), &skeleton()).unwrap();
        for id in ["a", "b", "c"] {
            write_shard(dir.path(), &spec(id)).unwrap();
        }

        let cache = add_jobs_to_cache(dir.path()).unwrap();
        let ids: BTreeSet<_> = cache.jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(cache.jobs.len(), 3);
        assert_eq!(ids, BTreeSet::from(["a", "b", "c"]));

        let reread = read_cache(dir.path()).unwrap();
        assert_eq!(reread.jobs.len(), 3);
    }

    #[test]
    fn duplicate_job_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), &spec("dup")).unwrap();
        assert!(write_shard(dir.path(), &spec("dup")).is_err());
    }

    #[test]
    fn fusion_with_no_shards_yields_empty_job_list() {
        let dir = tempfile::tempdir().unwrap();
        write_cache(dir.path(), &skeleton()).unwrap();
        let cache = add_jobs_to_cache(dir.path()).unwrap();
        assert!(cache.jobs.is_empty());
    }

    #[test]
    fn shards_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let original = spec("roundtrip");
        write_shard(dir.path(), &original).unwrap();
        assert_eq!(read_shard(dir.path(), "roundtrip").unwrap(), original);
    }
}
