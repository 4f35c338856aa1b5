//! Artifact names inside the mesh directory.
//!
//! Row artifacts are `<node>.json`. The aggregator's outputs use reserved
//! names that can never collide with a valid node identity.

/// Merged cluster matrix, read by the scheduler.
pub const MATRIX_ARTIFACT: &str = "cluster-latency.json";

/// Sidecar with generation and observation timestamps for the matrix.
pub const META_ARTIFACT: &str = "cluster-latency.meta.json";

/// File extension shared by every artifact.
pub const ARTIFACT_EXTENSION: &str = "json";

/// Prefix of in-flight temp files. A leftover one means a writer died
/// between create and rename.
pub const TEMP_PREFIX: &str = ".latmesh-tmp-";

/// Stems that node identities may not use.
pub const RESERVED_STEMS: [&str; 2] = ["cluster-latency", "cluster-latency.meta"];

/// Whether a directory entry name is a probe row artifact.
///
/// Excludes the aggregator's own outputs and hidden files (in-flight temp
/// files are created with a leading dot).
pub fn is_row_artifact(file_name: &str) -> bool {
    if file_name.starts_with('.') {
        return false;
    }
    if file_name == MATRIX_ARTIFACT || file_name == META_ARTIFACT {
        return false;
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => ext == ARTIFACT_EXTENSION && !stem.is_empty(),
        None => false,
    }
}

/// Whether a directory entry name is an in-flight (or abandoned) temp file.
pub fn is_temp_artifact(file_name: &str) -> bool {
    file_name.starts_with(TEMP_PREFIX)
}
