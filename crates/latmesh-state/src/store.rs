//! MeshStore — the shared artifact directory.
//!
//! Probes write one row artifact each; the aggregator reads them all and
//! writes the matrix plus its metadata sidecar. Writes go through a temp
//! file in the same directory followed by a rename, so a reader only ever
//! sees a complete previous or complete new artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::Builder;
use tracing::{debug, warn};

use crate::artifacts::{
    META_ARTIFACT, MATRIX_ARTIFACT, TEMP_PREFIX, is_row_artifact, is_temp_artifact,
};
use crate::error::{StateError, StateResult};
use crate::types::*;

/// Handle to the mesh directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MeshStore {
    dir: Arc<PathBuf>,
}

impl MeshStore {
    /// Point a store at `dir`. The directory is created on first write.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Arc::new(dir.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn row_path(&self, node: &NodeId) -> PathBuf {
        self.dir.join(node.artifact_name())
    }

    pub fn matrix_path(&self) -> PathBuf {
        self.dir.join(MATRIX_ARTIFACT)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_ARTIFACT)
    }

    /// Create the directory if it does not exist yet.
    pub fn ensure_dir(&self) -> StateResult<()> {
        fs::create_dir_all(self.dir.as_path()).map_err(|e| StateError::io(self.dir.as_path(), e))
    }

    // ── Rows ──────────────────────────────────────────────────────

    /// Replace this node's row artifact with `row`.
    pub fn write_row(&self, row: &PartialRow) -> StateResult<PathBuf> {
        let path = self.row_path(row.node());
        self.write_atomic(&path, &row.to_json()?)?;
        debug!(node = %row.node(), path = %path.display(), entries = row.len(), "row stored");
        Ok(path)
    }

    /// Read and validate one row artifact.
    ///
    /// The row's measurement time is the artifact's modification time.
    pub fn read_row(&self, path: &Path) -> StateResult<PartialRow> {
        let bytes = fs::read(path).map_err(|e| StateError::io(path, e))?;
        let measured_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(system_time_secs)
            .unwrap_or_else(|_| epoch_secs());

        PartialRow::from_json(&bytes, measured_at).map_err(|reason| StateError::Malformed {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// List row artifacts, sorted by file name.
    ///
    /// The aggregator's own outputs and in-flight temp files are excluded.
    pub fn list_row_artifacts(&self) -> StateResult<Vec<PathBuf>> {
        let entries = fs::read_dir(self.dir.as_path()).map_err(|e| StateError::io(self.dir.as_path(), e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(self.dir.as_path(), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_row_artifact(name) {
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    // ── Matrix ────────────────────────────────────────────────────

    /// Publish a merged matrix and its metadata.
    ///
    /// The sidecar is replaced first so it never describes an older matrix
    /// than the one a reader can see. If the matrix itself then cannot be
    /// replaced, the previous sidecar is put back (or removed if there was
    /// none), so the pair on disk stays consistent.
    pub fn write_matrix(&self, matrix: &ClusterMatrix, meta: &MatrixMeta) -> StateResult<()> {
        let meta_path = self.meta_path();
        let meta_bytes =
            serde_json::to_vec_pretty(meta).map_err(|e| StateError::Serialize(e.to_string()))?;
        let matrix_bytes = matrix.to_json()?;

        let previous_meta = match fs::read(&meta_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StateError::io(meta_path, e)),
        };

        self.write_atomic(&meta_path, &meta_bytes)?;
        if let Err(e) = self.write_atomic(&self.matrix_path(), &matrix_bytes) {
            let restored = match &previous_meta {
                Some(bytes) => self.write_atomic(&meta_path, bytes),
                None => fs::remove_file(&meta_path).map_err(|e| StateError::io(&meta_path, e)),
            };
            if let Err(restore) = restored {
                warn!(path = %meta_path.display(), error = %restore, "cannot restore previous matrix metadata");
            }
            return Err(e);
        }

        debug!(rows = matrix.len(), path = %self.matrix_path().display(), "matrix stored");
        Ok(())
    }

    /// Read the published matrix, if there is one.
    pub fn read_matrix(&self) -> StateResult<Option<ClusterMatrix>> {
        let path = self.matrix_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(path, e)),
        };

        let observed = self.read_meta()?.map(|m| m.rows).unwrap_or_default();
        let fallback = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(system_time_secs)
            .unwrap_or_else(|_| epoch_secs());

        ClusterMatrix::from_json(&bytes, &observed, fallback)
            .map(Some)
            .map_err(|reason| StateError::Malformed { path, reason })
    }

    /// Read the metadata sidecar, if there is one.
    pub fn read_meta(&self) -> StateResult<Option<MatrixMeta>> {
        let path = self.meta_path();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StateError::Malformed {
                    path,
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    // ── Housekeeping ──────────────────────────────────────────────

    /// Delete temp files abandoned by writers that died before renaming,
    /// once they are older than `older_than`. Returns the removed paths.
    ///
    /// Younger temp files may belong to a write in progress and are left
    /// alone.
    pub fn sweep_temp_files(&self, older_than: Duration) -> StateResult<Vec<PathBuf>> {
        let entries = fs::read_dir(self.dir.as_path()).map_err(|e| StateError::io(self.dir.as_path(), e))?;
        let now = SystemTime::now();

        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(self.dir.as_path(), e))?;
            let name = entry.file_name();
            if !name.to_str().is_some_and(is_temp_artifact) {
                continue;
            }

            let path = entry.path();
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= older_than {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "abandoned temp file removed");
                    removed.push(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StateError::io(path, e)),
            }
        }
        Ok(removed)
    }

    /// Write `bytes` to a temp file next to `path`, sync it, and rename it
    /// over `path`.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StateResult<()> {
        self.ensure_dir()?;

        let mut tmp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(self.dir.as_path())
            .map_err(|e| StateError::io(self.dir.as_path(), e))?;
        tmp.write_all(bytes).map_err(|e| StateError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StateError::io(tmp.path(), e))?;

        // Temp files are created 0600; artifacts are read by other users.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(|e| StateError::io(tmp.path(), e))?;
        }

        tmp.persist(path).map_err(|e| StateError::io(path, e.error))?;
        Ok(())
    }
}

/// Run a blocking storage operation off the async runtime, bounded by
/// `timeout`.
///
/// On timeout the caller gets `StateError::Timeout`; the blocking task
/// itself is not interrupted and finishes in the background.
pub async fn bounded<T, F>(timeout: Duration, op: F) -> StateResult<T>
where
    F: FnOnce() -> StateResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(op)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(StateError::Join(e.to_string())),
        Err(_) => Err(StateError::Timeout(timeout)),
    }
}
