//! Copying a job's declared outputs into the report's artifact area.

use std::path::{Path, PathBuf};

use litani_core::model::JobSpec;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("declared output '{0}' was not produced")]
    MissingOutput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Copies output artifacts into a directory. A missing output is tolerated
/// only when the job declares it phony.
pub struct Copier<'a> {
    artifacts_dir: PathBuf,
    spec: &'a JobSpec,
}

impl<'a> Copier<'a> {
    pub fn new(artifacts_dir: &Path, spec: &'a JobSpec) -> Self {
        Copier {
            artifacts_dir: artifacts_dir.to_path_buf(),
            spec,
        }
    }

    /// Copy one declared output: files keep their name, directories are
    /// merged recursively into the artifact area.
    pub fn copy_output_artifact(&self, output: &str) -> Result<(), ArtifactError> {
        let source = Path::new(output);
        if source.is_file() {
            std::fs::create_dir_all(&self.artifacts_dir)?;
            let name = source
                .file_name()
                .ok_or_else(|| ArtifactError::MissingOutput(output.to_string()))?;
            std::fs::copy(source, self.artifacts_dir.join(name))?;
            return Ok(());
        }
        if source.is_dir() {
            copy_dir_all(source, &self.artifacts_dir)?;
            return Ok(());
        }
        self.tolerate_missing(output)
    }

    fn tolerate_missing(&self, output: &str) -> Result<(), ArtifactError> {
        match &self.spec.phony_outputs {
            // No phony outputs declared at all.
            None => Err(ArtifactError::MissingOutput(output.to_string())),
            // An empty list declares every output phony.
            Some(phony) if phony.is_empty() => Ok(()),
            Some(phony) if phony.iter().any(|p| p == output) => Ok(()),
            Some(_) => Err(ArtifactError::MissingOutput(output.to_string())),
        }
    }
}

/// Recursively copy the contents of `src` into `dst`, merging with
/// whatever is already there.
pub fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
