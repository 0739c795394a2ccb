//! On-disk trace artifacts whose file names follow their status.
//!
//! An artifact's status is encoded as a prefix of its file name, so an
//! archived run directory can be triaged without opening anything.
//! The invariant check lives in the pure [`transition_status`]; the
//! rename side effect lives in [`ArtifactFile::set_status`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::errors::FlickerError;
use crate::status::RunStatus;

/// An artifact shared by every run result built from it.
pub type SharedArtifact = Arc<Mutex<ArtifactFile>>;

/// Compute the path an artifact moves to when its status changes.
///
/// No I/O. Fails if `from` is a terminal failure status and `to` differs.
pub fn transition_status(
    path: &Path,
    from: RunStatus,
    to: RunStatus,
) -> Result<PathBuf, FlickerError> {
    from.check_transition(to)?;
    if from == to {
        return Ok(path.to_path_buf());
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Strip only the prefix of the current status
    let base = match from {
        RunStatus::Undefined => file_name.as_str(),
        _ => file_name.strip_prefix(from.prefix()).unwrap_or(&file_name),
    };
    Ok(path.with_file_name(format!("{}{}", to.prefix(), base)))
}

/// A single trace artifact and its current status.
#[derive(Debug)]
pub struct ArtifactFile {
    path: PathBuf,
    status: RunStatus,
}

impl ArtifactFile {
    /// Track an existing file. The name is left untouched until the first
    /// status change.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: RunStatus::Undefined,
        }
    }

    pub fn shared(path: impl Into<PathBuf>) -> SharedArtifact {
        Arc::new(Mutex::new(Self::new(path)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Move to `status`, renaming the backing file.
    ///
    /// Rename errors are logged, never returned; the in-memory status and
    /// path are updated regardless.
    pub fn set_status(&mut self, status: RunStatus) -> Result<(), FlickerError> {
        let new_path = transition_status(&self.path, self.status, status)?;
        if new_path != self.path {
            if let Err(e) = std::fs::rename(&self.path, &new_path) {
                tracing::warn!(
                    from = %self.path.display(),
                    to = %new_path.display(),
                    error = %e,
                    "Failed to rename artifact"
                );
            } else {
                tracing::debug!(path = %new_path.display(), %status, "Artifact renamed");
            }
        }
        self.path = new_path;
        self.status = status;
        Ok(())
    }
}

/// Set the status of a shared artifact.
pub fn set_shared_status(artifact: &SharedArtifact, status: RunStatus) -> Result<(), FlickerError> {
    artifact
        .lock()
        .map_err(|_| FlickerError::LockPoisoned)?
        .set_status(status)
}

/// Read the current path of a shared artifact.
pub fn shared_path(artifact: &SharedArtifact) -> Option<PathBuf> {
    artifact.lock().ok().map(|a| a.path().to_path_buf())
}

/// Bundle every existing file in `files` into `<dir>/<name>.zip`.
///
/// Raw files are removed once the bundle is written. Returns `None` if none
/// of the files exist.
pub fn bundle_artifacts(
    dir: &Path,
    name: &str,
    files: &[PathBuf],
) -> Result<Option<ArtifactFile>, FlickerError> {
    let existing: Vec<&PathBuf> = files.iter().filter(|f| f.is_file()).collect();
    if existing.is_empty() {
        tracing::debug!(bundle = name, "No artifacts to bundle");
        return Ok(None);
    }

    let bundle_path = dir.join(format!("{}.zip", name));
    write_zip(&bundle_path, &existing).map_err(|source| FlickerError::BundleFailed {
        path: bundle_path.clone(),
        source,
    })?;

    for file in existing {
        if let Err(e) = std::fs::remove_file(file) {
            tracing::warn!(path = %file.display(), error = %e, "Failed to remove bundled file");
        }
    }

    tracing::debug!(bundle = %bundle_path.display(), "Artifacts bundled");
    Ok(Some(ArtifactFile::new(bundle_path)))
}

fn write_zip(bundle_path: &Path, files: &[&PathBuf]) -> Result<()> {
    if let Some(parent) = bundle_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let out = File::create(bundle_path)
        .with_context(|| format!("Failed to create {}", bundle_path.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Zstd);

    for file in files {
        let entry_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Artifact has no file name")?;
        let content = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        zip.start_file(entry_name, options)
            .context("Failed to start zip entry")?;
        zip.write_all(&content).context("Failed to write zip entry")?;
    }

    zip.finish()
        .context("Failed to finish zip")?
        .flush()
        .context("Failed to flush zip")?;
    Ok(())
}
