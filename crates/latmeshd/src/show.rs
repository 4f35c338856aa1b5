//! `latmeshd show` — print the published matrix.

use std::fmt::Write as _;
use std::path::Path;

use latmesh_state::{ClusterMatrix, MatrixMeta, MeshStore, epoch_secs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Aligned table, one row per measuring node.
    Text,
    /// The matrix artifact as published.
    Json,
}

pub fn run_show(data_dir: &Path, format: Format) -> anyhow::Result<()> {
    let store = MeshStore::open(data_dir);
    let Some(matrix) = store.read_matrix()? else {
        println!("no matrix published yet in {}", data_dir.display());
        return Ok(());
    };

    match format {
        Format::Json => println!("{}", String::from_utf8_lossy(&matrix.to_json()?)),
        Format::Text => {
            let meta = store.read_meta()?;
            print!("{}", render_table(&matrix, meta.as_ref(), epoch_secs()));
        }
    }
    Ok(())
}

/// Render the matrix as a table. Columns are the union of every row's
/// peers; a missing entry shows as `-`, an unreachable one as `x`.
fn render_table(matrix: &ClusterMatrix, meta: Option<&MatrixMeta>, now: u64) -> String {
    let mut columns: Vec<_> = matrix
        .rows()
        .flat_map(|row| row.entries().keys())
        .collect();
    columns.sort();
    columns.dedup();

    let width = columns
        .iter()
        .map(|c| c.as_str().len())
        .chain(matrix.nodes().map(|n| n.as_str().len()))
        .max()
        .unwrap_or(0)
        .max(8);

    let mut out = String::new();
    let _ = write!(out, "{:<width$}", "");
    for column in &columns {
        let _ = write!(out, "  {:>width$}", column.as_str());
    }
    out.push('\n');

    for row in matrix.rows() {
        let _ = write!(out, "{:<width$}", row.node().as_str());
        for column in &columns {
            let cell = match row.get(column) {
                None => "-".to_string(),
                Some(None) => "x".to_string(),
                Some(Some(ms)) => format!("{ms:.2}"),
            };
            let _ = write!(out, "  {cell:>width$}");
        }
        out.push('\n');
    }

    if let Some(meta) = meta {
        let _ = writeln!(
            out,
            "\n{} rows from {} artifacts, generated {}s ago",
            matrix.len(),
            meta.artifacts_scanned,
            meta.age_secs(now)
        );
        if let Some(oldest) = meta.oldest_row() {
            let _ = writeln!(out, "oldest row measured {}s ago", now.saturating_sub(oldest));
        }
        if !meta.skipped.is_empty() {
            let _ = writeln!(out, "skipped: {}", meta.skipped.join(", "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use latmesh_state::{NodeId, PartialRow};

    use super::*;

    fn id(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    fn matrix() -> ClusterMatrix {
        let mut a = PartialRow::new(id("a"));
        a.record(id("b"), Some(1.5));
        a.record(id("c"), None);
        let mut b = PartialRow::new(id("b"));
        b.record(id("a"), Some(2.0));

        let mut matrix = ClusterMatrix::new();
        matrix.insert(a);
        matrix.insert(b);
        matrix
    }

    #[test]
    fn table_marks_missing_and_unreachable() {
        let table = render_table(&matrix(), None, 0);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);

        let header: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(header, vec!["a", "b", "c"]);

        let a: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(a, vec!["a", "0.00", "1.50", "x"]);

        let b: Vec<&str> = lines[2].split_whitespace().collect();
        assert_eq!(b, vec!["b", "2.00", "0.00", "-"]);
    }

    #[test]
    fn table_includes_meta_summary() {
        let mut meta = MatrixMeta {
            generated_at: 100,
            artifacts_scanned: 3,
            skipped: vec!["broken.json".to_string()],
            ..Default::default()
        };
        meta.rows.insert(id("a"), 90);
        meta.rows.insert(id("b"), 70);

        let table = render_table(&matrix(), Some(&meta), 110);
        assert!(table.contains("2 rows from 3 artifacts, generated 10s ago"));
        assert!(table.contains("oldest row measured 40s ago"));
        assert!(table.contains("skipped: broken.json"));
    }

    #[test]
    fn empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        run_show(dir.path(), Format::Text).unwrap();
        run_show(dir.path(), Format::Json).unwrap();
    }
}
