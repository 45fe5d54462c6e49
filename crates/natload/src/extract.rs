//! Extraction of bundled libraries into the temp area, and their cleanup.
//!
//! Every extraction writes a fresh `{stem}-{uuid}.{ext}` file opened with
//! `create_new`, so an existing file is never reused or overwritten. The
//! resulting [`TempArtifact`] must be passed to [`TempArtifact::cleanup`] once
//! the load attempt is over: the file is either deleted right away or queued
//! for deletion at process exit.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use crate::platform::ResourcePath;
use crate::resources::ResourceStore;

/// Extraction failure. Never reported to callers of
/// [`Loader`](crate::Loader) as its own kind; they see the not-found error
/// that triggered the extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No bundled copy at the expected resource path.
    #[error("resource {0} not found")]
    Missing(String),

    /// The resource exists but could not be read or written out.
    #[error("failed to extract {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Outcome of [`TempArtifact::cleanup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// Removed synchronously.
    Deleted,
    /// Could not be removed now; queued for deletion at process exit.
    Deferred,
}

/// A library file written by [`extract_resource`], owned by the loader until
/// cleanup.
#[derive(Debug)]
#[must_use = "temp artifacts must be cleaned up"]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file, or queue it for deletion at exit if that fails.
    ///
    /// Never fails; a file that is already gone counts as deleted.
    pub fn cleanup(self) -> Cleanup {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Removed extracted library {}", self.path.display());
                Cleanup::Deleted
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Cleanup::Deleted,
            Err(e) => {
                tracing::debug!(
                    "Deferring removal of {} until exit: {}",
                    self.path.display(),
                    e
                );
                delete_on_exit(self.path);
                Cleanup::Deferred
            }
        }
    }
}

/// Copy the bundled resource at `resource` into a new unique file in
/// `temp_dir`.
pub fn extract_resource(
    store: &dyn ResourceStore,
    resource: &ResourcePath,
    temp_dir: &Path,
) -> Result<TempArtifact, ExtractError> {
    let io_error = |source| ExtractError::Io {
        path: resource.to_string(),
        source,
    };

    let data = store
        .get(resource.as_str())
        .map_err(io_error)?
        .ok_or_else(|| ExtractError::Missing(resource.to_string()))?;

    fs::create_dir_all(temp_dir).map_err(io_error)?;
    let path = temp_dir.join(unique_name(resource.file_name()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_error)?;
    let artifact = TempArtifact { path };

    if let Err(e) = file.write_all(&data).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = artifact.cleanup();
        return Err(io_error(e));
    }

    tracing::debug!(
        "Extracted {} ({} bytes) to {}",
        resource,
        data.len(),
        artifact.path.display()
    );
    Ok(artifact)
}

/// `libvad.so` -> `libvad-<uuid>.so`.
fn unique_name(file_name: &str) -> String {
    let uuid = Uuid::new_v4();
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{}-{}.{}", stem, uuid, extension),
        _ => format!("{}-{}", file_name, uuid),
    }
}

static EXIT_DELETIONS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
static EXIT_HOOK: Once = Once::new();

/// Queue `path` for removal when the process exits normally.
pub fn delete_on_exit(path: PathBuf) {
    EXIT_HOOK.call_once(|| {
        // SAFETY: registers a plain `extern "C"` function with no captured state.
        if unsafe { libc::atexit(run_exit_deletions) } != 0 {
            tracing::warn!("Could not register exit hook; extracted libraries may be left behind");
        }
    });

    let mut pending = EXIT_DELETIONS.lock().unwrap_or_else(PoisonError::into_inner);
    if !pending.contains(&path) {
        pending.push(path);
    }
}

/// Paths currently queued for deletion at exit.
pub fn pending_exit_deletions() -> Vec<PathBuf> {
    EXIT_DELETIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

extern "C" fn run_exit_deletions() {
    let pending = std::mem::take(&mut *EXIT_DELETIONS.lock().unwrap_or_else(PoisonError::into_inner));
    for path in pending {
        let _ = fs::remove_file(&path);
    }
}
