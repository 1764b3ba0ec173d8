use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::warn;

use crate::atlas::nifti_stem;
use crate::errors::{CreateWorkDirSnafu, Error};

/// Scratch directory for one segmentation run, holding every transform and
/// intermediate image. Teardown is explicit via [`WorkDir::close`] and only
/// happens on the success path; if the run dies partway, the directory is
/// left behind so the intermediates can be inspected.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create the working directory for a run. The scratch base is `$TMPDIR`
    /// when set, else the directory containing the output root. The name
    /// includes the output stem and the process id; a leftover directory from
    /// a previous run with the same name makes creation fail.
    pub fn create(output_root: &Path) -> Result<Self, Error> {
        let base = match std::env::var_os("TMPDIR") {
            Some(tmp) if !tmp.is_empty() => PathBuf::from(tmp),
            _ => output_root
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .to_path_buf(),
        };
        let name = format!(
            "multiatlas.{}.{}",
            nifti_stem(output_root),
            std::process::id()
        );
        let path = base.join(name);
        std::fs::create_dir(&path).context(CreateWorkDirSnafu { path: &path })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Best-effort teardown: remove every file we can, then the directory
    /// itself. Failures are logged, never fatal.
    pub fn close(self) {
        match std::fs::read_dir(&self.path) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Err(e) = std::fs::remove_file(entry.path()) {
                        warn!("could not remove {}: {}", entry.path().display(), e);
                    }
                }
            }
            Err(e) => warn!("could not list {}: {}", self.path.display(), e),
        }
        if let Err(e) = std::fs::remove_dir(&self.path) {
            warn!(
                "could not remove working directory {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // TMPDIR is cleared so these tests exercise the fallback base beside the
    // output root; the end-to-end tests cover the TMPDIR-preferred case.

    fn create_beside(out: &TempDir) -> WorkDir {
        std::env::remove_var("TMPDIR");
        WorkDir::create(&out.path().join("subject_")).unwrap()
    }

    #[test]
    fn test_create_and_close() {
        let out = TempDir::new().unwrap();
        let workdir = create_beside(&out);
        let path = workdir.path().to_path_buf();
        assert!(path.is_dir());
        assert!(path.starts_with(out.path()));

        std::fs::write(workdir.join("atlas000_rigid.mat"), b"transform").unwrap();
        workdir.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_leftover_fails_creation() {
        let out = TempDir::new().unwrap();
        let workdir = create_beside(&out);
        let stale = workdir.path().to_path_buf();

        // second run with the same pid and output root collides
        let result = WorkDir::create(&out.path().join("subject_"));
        assert!(matches!(result, Err(Error::CreateWorkDir { .. })));

        std::fs::remove_dir(stale).unwrap();
    }
}
