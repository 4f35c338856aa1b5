//! Domain types for the latency mesh.
//!
//! A `PartialRow` is one node's view of its distances to every peer it
//! discovered in a cycle. A `ClusterMatrix` is the union of the latest rows
//! found in the mesh directory. Both serialize to the same nested map shape:
//! `{ "<node>": { "<peer>": <ms> | null } }`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::artifacts::{ARTIFACT_EXTENSION, RESERVED_STEMS};
use crate::error::{StateError, StateResult};

/// Round-trip time in milliseconds, or `None` when no measurement exists.
pub type Rtt = Option<f64>;

/// Longest node name accepted (matches the DNS subdomain limit).
const MAX_NODE_ID_LEN: usize = 253;

// ── NodeId ────────────────────────────────────────────────────────

/// Stable logical name of a cluster member.
///
/// Used as the row key, the column key, and the artifact file stem, so it
/// must be a valid single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap a node name.
    pub fn new(name: impl Into<String>) -> StateResult<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_NODE_ID_LEN {
            Some("longer than 253 bytes")
        } else if name.starts_with('.') {
            Some("must not start with '.'")
        } else if name.contains(['/', '\\', '\0']) || name.chars().any(char::is_whitespace) {
            Some("contains a path separator, NUL, or whitespace")
        } else if RESERVED_STEMS.contains(&name.as_str()) {
            Some("reserved for aggregator output")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StateError::InvalidNodeId { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this node's row artifact.
    pub fn artifact_name(&self) -> String {
        format!("{}.{ARTIFACT_EXTENSION}", self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl FromStr for NodeId {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Measurement ───────────────────────────────────────────────────

/// Result of one successful measurement against a peer.
///
/// Only `avg_ms` ends up in the matrix; the rest is diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RttSample {
    /// Packet loss reported by the measurement tool, if it reported one.
    pub loss_percent: Option<u8>,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

impl RttSample {
    /// The value recorded in a row, or `None` if the average is unusable.
    pub fn rtt(&self) -> Rtt {
        valid_rtt(self.avg_ms)
    }
}

fn valid_rtt(ms: f64) -> Rtt {
    (ms.is_finite() && ms >= 0.0).then_some(ms)
}

// ── PartialRow ────────────────────────────────────────────────────

/// One node's measured distances to the peers it knew about in a cycle.
///
/// The distance to self is always `Some(0.0)` and cannot be overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRow {
    node: NodeId,
    /// Unix timestamp (seconds) when this row was measured.
    measured_at: u64,
    entries: BTreeMap<NodeId, Rtt>,
}

impl PartialRow {
    /// Start a fresh row for `node`, holding only the self-distance.
    pub fn new(node: NodeId) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(node.clone(), Some(0.0));
        Self {
            node,
            measured_at: epoch_secs(),
            entries,
        }
    }

    pub fn with_measured_at(mut self, measured_at: u64) -> Self {
        self.measured_at = measured_at;
        self
    }

    /// Record the distance to `peer`.
    ///
    /// Self-distance stays 0 regardless of `rtt`. Negative or non-finite
    /// values are stored as absent. Returns `false` if the entry was ignored.
    pub fn record(&mut self, peer: NodeId, rtt: Rtt) -> bool {
        if peer == self.node {
            return false;
        }
        self.entries.insert(peer, rtt.and_then(valid_rtt));
        true
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn measured_at(&self) -> u64 {
        self.measured_at
    }

    pub fn entries(&self) -> &BTreeMap<NodeId, Rtt> {
        &self.entries
    }

    /// Distance to `peer`: `None` if the peer is unknown to this row,
    /// `Some(None)` if it is known but unmeasured.
    pub fn get(&self, peer: &NodeId) -> Option<Rtt> {
        self.entries.get(peer).copied()
    }

    /// Number of peers with a usable measurement (self excluded).
    pub fn reachable(&self) -> usize {
        self.entries
            .iter()
            .filter(|(peer, rtt)| **peer != self.node && rtt.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the row artifact format `{ "<node>": { ... } }`.
    pub fn to_json(&self) -> StateResult<Vec<u8>> {
        let mut wire: BTreeMap<&NodeId, &BTreeMap<NodeId, Rtt>> = BTreeMap::new();
        wire.insert(&self.node, &self.entries);
        serde_json::to_vec_pretty(&wire).map_err(|e| StateError::Serialize(e.to_string()))
    }

    /// Parse a row artifact. The row is keyed by the identity it declares.
    ///
    /// Exactly one identity must be declared. A missing self entry is filled
    /// in with 0; any other self value rejects the row.
    pub fn from_json(bytes: &[u8], measured_at: u64) -> Result<Self, String> {
        let wire: BTreeMap<NodeId, BTreeMap<NodeId, Rtt>> =
            serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

        if wire.len() != 1 {
            return Err(format!("expected exactly one node identity, found {}", wire.len()));
        }
        let Some((node, entries)) = wire.into_iter().next() else {
            return Err("empty row".to_string());
        };
        Self::from_entries(node, entries, measured_at)
    }

    fn from_entries(
        node: NodeId,
        mut entries: BTreeMap<NodeId, Rtt>,
        measured_at: u64,
    ) -> Result<Self, String> {
        match entries.get(&node) {
            None => {
                entries.insert(node.clone(), Some(0.0));
            }
            Some(Some(ms)) if *ms == 0.0 => {}
            Some(other) => {
                return Err(format!("self distance for {node} must be 0, found {other:?}"));
            }
        }

        if let Some((peer, ms)) = entries
            .iter()
            .find_map(|(peer, rtt)| rtt.filter(|ms| valid_rtt(*ms).is_none()).map(|ms| (peer, ms)))
        {
            return Err(format!("invalid rtt {ms} for peer {peer}"));
        }

        Ok(Self {
            node,
            measured_at,
            entries,
        })
    }
}

// ── ClusterMatrix ─────────────────────────────────────────────────

/// Union of the latest rows from every node that published one.
///
/// Not necessarily symmetric: `A -> B` and `B -> A` are measured
/// independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMatrix {
    rows: BTreeMap<NodeId, PartialRow>,
}

impl ClusterMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row under the identity it declares, returning any row it
    /// replaced.
    pub fn insert(&mut self, row: PartialRow) -> Option<PartialRow> {
        self.rows.insert(row.node().clone(), row)
    }

    pub fn row(&self, node: &NodeId) -> Option<&PartialRow> {
        self.rows.get(node)
    }

    /// Distance from `from` to `to`, with the same layering as
    /// [`PartialRow::get`].
    pub fn rtt(&self, from: &NodeId, to: &NodeId) -> Option<Rtt> {
        self.rows.get(from).and_then(|row| row.get(to))
    }

    pub fn rows(&self) -> impl Iterator<Item = &PartialRow> {
        self.rows.values()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.rows.keys()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize to the matrix artifact format. Keys are sorted, so equal
    /// matrices produce identical bytes.
    pub fn to_json(&self) -> StateResult<Vec<u8>> {
        let wire: BTreeMap<&NodeId, &BTreeMap<NodeId, Rtt>> = self
            .rows
            .iter()
            .map(|(node, row)| (node, row.entries()))
            .collect();
        serde_json::to_vec_pretty(&wire).map_err(|e| StateError::Serialize(e.to_string()))
    }

    /// Parse a matrix artifact. `observed_at` supplies each row's
    /// measurement time, defaulting to `fallback` for rows it does not know.
    pub fn from_json(
        bytes: &[u8],
        observed_at: &BTreeMap<NodeId, u64>,
        fallback: u64,
    ) -> Result<Self, String> {
        let wire: BTreeMap<NodeId, BTreeMap<NodeId, Rtt>> =
            serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

        let mut matrix = Self::new();
        for (node, entries) in wire {
            let measured_at = observed_at.get(&node).copied().unwrap_or(fallback);
            matrix.insert(PartialRow::from_entries(node, entries, measured_at)?);
        }
        Ok(matrix)
    }
}

// ── Metadata ──────────────────────────────────────────────────────

/// Sidecar describing a published matrix.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatrixMeta {
    /// Unix timestamp (seconds) when the matrix was generated.
    pub generated_at: u64,
    /// Row artifacts found in the directory during the merge.
    pub artifacts_scanned: usize,
    /// Measurement time of each merged row.
    pub rows: BTreeMap<NodeId, u64>,
    /// Artifacts that could not be read, parsed, or were too old.
    pub skipped: Vec<String>,
}

impl MatrixMeta {
    /// Seconds between generation and `now`.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.generated_at)
    }

    /// Measurement time of the oldest row, if any.
    pub fn oldest_row(&self) -> Option<u64> {
        self.rows.values().copied().min()
    }
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    system_time_secs(SystemTime::now())
}

/// Convert a `SystemTime` to Unix seconds, clamping pre-epoch times to 0.
pub fn system_time_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    #[test]
    fn node_id_rejects_path_components() {
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("a/b").is_err());
        assert!(NodeId::new("..").is_err());
        assert!(NodeId::new(".hidden").is_err());
        assert!(NodeId::new("has space").is_err());
        assert!(NodeId::new("cluster-latency").is_err());
        assert!(NodeId::new("cluster-latency.meta").is_err());
        assert!(NodeId::new("worker-1").is_ok());
    }

    #[test]
    fn node_id_artifact_name() {
        assert_eq!(id("worker-1").artifact_name(), "worker-1.json");
    }

    #[test]
    fn new_row_holds_self_at_zero() {
        let row = PartialRow::new(id("a"));
        assert_eq!(row.get(&id("a")), Some(Some(0.0)));
        assert_eq!(row.len(), 1);
        assert_eq!(row.reachable(), 0);
    }

    #[test]
    fn record_never_overrides_self() {
        let mut row = PartialRow::new(id("a"));
        assert!(!row.record(id("a"), Some(3.5)));
        assert!(!row.record(id("a"), None));
        assert_eq!(row.get(&id("a")), Some(Some(0.0)));
    }

    #[test]
    fn record_keeps_absent_distinct_from_zero() {
        let mut row = PartialRow::new(id("a"));
        row.record(id("b"), None);
        row.record(id("c"), Some(0.25));
        assert_eq!(row.get(&id("b")), Some(None));
        assert_eq!(row.get(&id("c")), Some(Some(0.25)));
        assert_eq!(row.get(&id("d")), None);
        assert_eq!(row.reachable(), 1);
    }

    #[test]
    fn record_discards_invalid_values() {
        let mut row = PartialRow::new(id("a"));
        row.record(id("b"), Some(-1.0));
        row.record(id("c"), Some(f64::NAN));
        assert_eq!(row.get(&id("b")), Some(None));
        assert_eq!(row.get(&id("c")), Some(None));
    }

    #[test]
    fn row_wire_format() {
        let mut row = PartialRow::new(id("a"));
        row.record(id("b"), Some(12.0));
        row.record(id("c"), None);

        let value: serde_json::Value = serde_json::from_slice(&row.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "a": { "a": 0.0, "b": 12.0, "c": null } })
        );
    }

    #[test]
    fn row_parse_keys_by_declared_identity() {
        let row = PartialRow::from_json(br#"{"x": {"x": 0, "y": 10.5, "z": null}}"#, 42).unwrap();
        assert_eq!(row.node(), &id("x"));
        assert_eq!(row.measured_at(), 42);
        assert_eq!(row.get(&id("y")), Some(Some(10.5)));
        assert_eq!(row.get(&id("z")), Some(None));
    }

    #[test]
    fn row_parse_fills_missing_self() {
        let row = PartialRow::from_json(br#"{"x": {"y": 1.0}}"#, 0).unwrap();
        assert_eq!(row.get(&id("x")), Some(Some(0.0)));
    }

    #[test]
    fn row_parse_rejects_bad_rows() {
        // Not JSON.
        assert!(PartialRow::from_json(b"{\"x\": {\"y\": 1.0", 0).is_err());
        // Two identities in one artifact.
        assert!(PartialRow::from_json(br#"{"x": {}, "y": {}}"#, 0).is_err());
        // No identity.
        assert!(PartialRow::from_json(b"{}", 0).is_err());
        // Non-zero self distance.
        assert!(PartialRow::from_json(br#"{"x": {"x": 3.0}}"#, 0).is_err());
        // Null self distance.
        assert!(PartialRow::from_json(br#"{"x": {"x": null}}"#, 0).is_err());
        // Negative rtt.
        assert!(PartialRow::from_json(br#"{"x": {"y": -2.0}}"#, 0).is_err());
        // Invalid identity.
        assert!(PartialRow::from_json(br#"{"../etc": {}}"#, 0).is_err());
    }

    #[test]
    fn matrix_json_is_sorted_and_stable() {
        let mut b = PartialRow::new(id("b"));
        b.record(id("a"), Some(11.0));
        let mut a = PartialRow::new(id("a"));
        a.record(id("b"), Some(10.0));

        let mut m1 = ClusterMatrix::new();
        m1.insert(b.clone());
        m1.insert(a.clone());
        let mut m2 = ClusterMatrix::new();
        m2.insert(a);
        m2.insert(b);

        let bytes = m1.to_json().unwrap();
        assert_eq!(bytes, m2.to_json().unwrap());
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("\"a\"").unwrap() < text.find("\"b\": {").unwrap());
    }

    #[test]
    fn matrix_need_not_be_symmetric() {
        let mut a = PartialRow::new(id("a"));
        a.record(id("b"), Some(10.0));
        let mut b = PartialRow::new(id("b"));
        b.record(id("a"), None);

        let mut m = ClusterMatrix::new();
        m.insert(a);
        m.insert(b);
        assert_eq!(m.rtt(&id("a"), &id("b")), Some(Some(10.0)));
        assert_eq!(m.rtt(&id("b"), &id("a")), Some(None));
    }

    #[test]
    fn matrix_parse_uses_observation_times() {
        let mut observed = BTreeMap::new();
        observed.insert(id("a"), 100);
        let m = ClusterMatrix::from_json(br#"{"a": {"a": 0.0}, "b": {"b": 0.0}}"#, &observed, 7)
            .unwrap();
        assert_eq!(m.row(&id("a")).unwrap().measured_at(), 100);
        assert_eq!(m.row(&id("b")).unwrap().measured_at(), 7);
    }

    #[test]
    fn empty_matrix_serializes_to_empty_object() {
        let bytes = ClusterMatrix::new().to_json().unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[test]
    fn meta_age() {
        let mut meta = MatrixMeta {
            generated_at: 100,
            ..Default::default()
        };
        assert_eq!(meta.age_secs(160), 60);
        assert_eq!(meta.age_secs(50), 0);
        assert_eq!(meta.oldest_row(), None);
        meta.rows.insert(id("a"), 90);
        meta.rows.insert(id("b"), 80);
        assert_eq!(meta.oldest_row(), Some(80));
    }
}
