//! Atomic file writes: readers observe either the old content or the new
//! content, never a truncated intermediate.

use std::io::Write as _;
use std::path::Path;

use uuid::Uuid;

/// Write `contents` to `path` via a sibling temp file and rename. Parent
/// directories are created as needed. The temp file is removed if anything
/// fails before the rename.
pub fn atomic_write(path: &Path, contents: impl AsRef<[u8]>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_file_name(format!(
        "{}~{}",
        path.file_name()
            .ok_or_else(|| anyhow::anyhow!("invalid target path: {}", path.display()))?
            .to_string_lossy(),
        Uuid::new_v4()
    ));

    let result = (|| -> anyhow::Result<()> {
        let mut handle = std::fs::File::create(&tmp)?;
        handle.write_all(contents.as_ref())?;
        handle.flush()?;
        drop(handle);
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::atomic_write;

    #[test]
    fn writes_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"{\"a\": 1}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, "old").unwrap();
        atomic_write(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn creates_missing_parents_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/out.json");
        atomic_write(&path, "x").unwrap();

        let siblings: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings, vec![std::ffi::OsString::from("out.json")]);
    }
}
