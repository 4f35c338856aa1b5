//! Aggregator — merges row artifacts into the cluster matrix.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use latmesh_state::{
    ClusterMatrix, MatrixMeta, MeshStore, PartialRow, StateResult, bounded, epoch_secs,
};

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TEMP_MAX_AGE: Duration = Duration::from_secs(600);

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Timeout for each artifact read and for the publish.
    pub io_timeout: Duration,
    /// Skip rows measured longer ago than this. `None` keeps every row.
    pub max_row_age: Option<Duration>,
    /// Abandoned temp files older than this are deleted on each pass.
    pub temp_max_age: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_row_age: None,
            temp_max_age: DEFAULT_TEMP_MAX_AGE,
        }
    }
}

/// Summary of one aggregation pass. Diagnostic only.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub artifacts_scanned: usize,
    pub rows_merged: usize,
    pub skipped: Vec<String>,
    pub generated_at: u64,
}

/// Merges the mesh directory into one matrix.
pub struct Aggregator {
    store: MeshStore,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(store: MeshStore, config: AggregatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &MeshStore {
        &self.store
    }

    /// Build a matrix from whatever rows are in the directory right now.
    ///
    /// An unreadable directory gives an empty matrix. An unreadable, invalid,
    /// or too old artifact is skipped without affecting the others. Rows are
    /// keyed by the identity they declare; if two artifacts declare the same
    /// one, the later artifact (by file name) wins.
    pub async fn merge(&self) -> (ClusterMatrix, MatrixMeta) {
        let now = epoch_secs();
        let mut matrix = ClusterMatrix::new();
        let mut meta = MatrixMeta {
            generated_at: now,
            ..Default::default()
        };

        let store = self.store.clone();
        let paths = match bounded(self.config.io_timeout, move || store.list_row_artifacts()).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(dir = %self.store.dir().display(), error = %e, "cannot list row artifacts, publishing empty matrix");
                return (matrix, meta);
            }
        };
        meta.artifacts_scanned = paths.len();

        for path in paths {
            let name = artifact_name(&path);
            let row = match self.read_row(path.clone()).await {
                Ok(row) => row,
                Err(e) => {
                    warn!(artifact = %name, error = %e, "skipping unreadable row artifact");
                    meta.skipped.push(name);
                    continue;
                }
            };

            if let Some(max_age) = self.config.max_row_age {
                let age = now.saturating_sub(row.measured_at());
                if age > max_age.as_secs() {
                    warn!(artifact = %name, node = %row.node(), age_secs = age, "skipping stale row");
                    meta.skipped.push(name);
                    continue;
                }
            }

            if name != row.node().artifact_name() {
                debug!(artifact = %name, node = %row.node(), "artifact name differs from declared node");
            }

            meta.rows.insert(row.node().clone(), row.measured_at());
            if let Some(previous) = matrix.insert(row) {
                warn!(artifact = %name, node = %previous.node(), "node declared by more than one artifact, keeping the later one");
            }
        }

        (matrix, meta)
    }

    /// Merge and publish once.
    ///
    /// Fails only if the publish itself fails, in which case the previous
    /// matrix stays in place.
    pub async fn run_once(&self) -> StateResult<AggregateReport> {
        self.sweep().await;
        let (matrix, meta) = self.merge().await;

        let report = AggregateReport {
            artifacts_scanned: meta.artifacts_scanned,
            rows_merged: matrix.len(),
            skipped: meta.skipped.clone(),
            generated_at: meta.generated_at,
        };

        let store = self.store.clone();
        bounded(self.config.io_timeout, move || store.write_matrix(&matrix, &meta)).await?;

        info!(
            artifacts = report.artifacts_scanned,
            nodes = report.rows_merged,
            skipped = report.skipped.len(),
            path = %self.store.matrix_path().display(),
            "cluster matrix published"
        );
        Ok(report)
    }

    /// Publish immediately, then every `interval` until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            dir = %self.store.dir().display(),
            "aggregator started"
        );

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "cluster matrix publish failed, previous matrix kept");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("aggregator shutting down");
                    break;
                }
            }
        }
    }

    /// Remove temp files left behind by writers that died mid-write.
    /// Failures only cost the cleanup.
    async fn sweep(&self) {
        let store = self.store.clone();
        let max_age = self.config.temp_max_age;
        match bounded(self.config.io_timeout, move || store.sweep_temp_files(max_age)).await {
            Ok(removed) if !removed.is_empty() => {
                info!(removed = removed.len(), "abandoned temp files cleaned up");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "temp file sweep skipped"),
        }
    }

    async fn read_row(&self, path: PathBuf) -> StateResult<PartialRow> {
        let store = self.store.clone();
        bounded(self.config.io_timeout, move || store.read_row(&path)).await
    }
}

fn artifact_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
