//! End-to-end tests: several probes sharing one directory, merged by the
//! aggregator. Membership and measurement are faked; storage is real.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use latmesh_aggregator::{Aggregator, AggregatorConfig};
use latmesh_probe::{
    CycleOutcome, MeasureError, Membership, MembershipError, MembershipProvider, Probe,
    ProbeConfig, RttMeasurer, StaticMembership,
};
use latmesh_state::{MeshStore, NodeId, Rtt, RttSample};

fn id(name: &str) -> NodeId {
    NodeId::new(name).unwrap()
}

/// Measurer answering from a fixed address → RTT table. `None` and
/// unknown addresses are unreachable.
struct TableMeasurer(HashMap<String, Rtt>);

impl TableMeasurer {
    fn new(rtts: &[(&str, Rtt)]) -> Self {
        Self(rtts.iter().map(|(a, r)| (a.to_string(), *r)).collect())
    }
}

impl RttMeasurer for TableMeasurer {
    async fn measure(
        &self,
        address: &str,
        _count: u32,
        _timeout: Duration,
    ) -> Result<RttSample, MeasureError> {
        match self.0.get(address) {
            Some(Some(ms)) => Ok(RttSample {
                loss_percent: Some(0),
                min_ms: *ms,
                avg_ms: *ms,
                max_ms: *ms,
            }),
            _ => Err(MeasureError::Unreachable {
                loss_percent: Some(100),
            }),
        }
    }
}

/// Membership that tests can change between cycles.
#[derive(Clone, Default)]
struct SharedMembership(Arc<Mutex<Membership>>);

impl SharedMembership {
    fn set(&self, members: &[&str]) {
        let mut current = self.0.lock().unwrap();
        current.clear();
        for name in members {
            current.insert(id(name), format!("{name}.addr"));
        }
    }
}

impl MembershipProvider for SharedMembership {
    async fn list_members(&self, _timeout: Duration) -> Result<Membership, MembershipError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

fn xyz() -> StaticMembership {
    StaticMembership::parse("x=x.addr,y=y.addr,z=z.addr").unwrap()
}

fn config(node: &str) -> ProbeConfig {
    ProbeConfig::new(id(node))
        .with_ping_timeout(Duration::from_secs(1))
        .with_io_timeout(Duration::from_secs(5))
}

fn aggregator(dir: &Path) -> Aggregator {
    Aggregator::new(MeshStore::open(dir), AggregatorConfig::default())
}

fn published(dir: &Path) -> Value {
    let bytes = std::fs::read(dir.join("cluster-latency.json")).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn publish<M: MembershipProvider, R: RttMeasurer>(probe: &Probe<M, R>) {
    match probe.run_cycle().await {
        CycleOutcome::Published(_) => {}
        other => panic!("expected a published row, got {}", other.kind()),
    }
}

#[tokio::test]
async fn three_node_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = MeshStore::open(dir.path());

    let x = Probe::new(
        config("x"),
        xyz(),
        TableMeasurer::new(&[("y.addr", Some(10.0)), ("z.addr", None)]),
        store.clone(),
    );
    let y = Probe::new(
        config("y"),
        xyz(),
        TableMeasurer::new(&[("x.addr", Some(11.0)), ("z.addr", Some(20.0))]),
        store.clone(),
    );
    publish(&x).await;
    publish(&y).await;
    // z never publishes.

    aggregator(dir.path()).run_once().await.unwrap();

    assert_eq!(
        published(dir.path()),
        json!({
            "x": { "x": 0.0, "y": 10.0, "z": null },
            "y": { "x": 11.0, "y": 0.0, "z": 20.0 },
        })
    );
}

#[tokio::test]
async fn membership_growth_widens_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = MeshStore::open(dir.path());
    let membership = SharedMembership::default();
    let everyone: Vec<(String, Rtt)> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|n| (format!("{n}.addr"), Some(1.0)))
        .collect();
    let table: Vec<(&str, Rtt)> = everyone.iter().map(|(a, r)| (a.as_str(), *r)).collect();

    let probe = Probe::new(
        config("a"),
        membership.clone(),
        TableMeasurer::new(&table),
        store.clone(),
    );
    let aggregator = aggregator(dir.path());

    membership.set(&["a", "b"]);
    publish(&probe).await;
    aggregator.run_once().await.unwrap();
    let row = published(dir.path())["a"].clone();
    assert_eq!(row.as_object().unwrap().len(), 2);

    membership.set(&["a", "b", "c", "d", "e"]);
    publish(&probe).await;
    aggregator.run_once().await.unwrap();
    let row = published(dir.path())["a"].clone();
    assert_eq!(
        row,
        json!({ "a": 0.0, "b": 1.0, "c": 1.0, "d": 1.0, "e": 1.0 })
    );
}

#[tokio::test]
async fn corrupt_and_unreachable_rows_do_not_spoil_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let store = MeshStore::open(dir.path());

    let x = Probe::new(
        config("x"),
        xyz(),
        TableMeasurer::new(&[("y.addr", Some(3.0)), ("z.addr", Some(4.0))]),
        store.clone(),
    );
    // y can reach nobody.
    let y = Probe::new(config("y"), xyz(), TableMeasurer::new(&[]), store.clone());
    publish(&x).await;
    publish(&y).await;
    std::fs::write(dir.path().join("z.json"), b"{ not json").unwrap();

    let report = aggregator(dir.path()).run_once().await.unwrap();
    assert_eq!(report.artifacts_scanned, 3);
    assert_eq!(report.rows_merged, 2);
    assert_eq!(report.skipped, vec!["z.json".to_string()]);

    assert_eq!(
        published(dir.path()),
        json!({
            "x": { "x": 0.0, "y": 3.0, "z": 4.0 },
            "y": { "x": null, "y": 0.0, "z": null },
        })
    );
}

#[tokio::test]
async fn rerun_without_changes_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let store = MeshStore::open(dir.path());
    let x = Probe::new(
        config("x"),
        xyz(),
        TableMeasurer::new(&[("y.addr", Some(0.25))]),
        store.clone(),
    );
    publish(&x).await;

    let aggregator = aggregator(dir.path());
    aggregator.run_once().await.unwrap();
    let first = std::fs::read(dir.path().join("cluster-latency.json")).unwrap();
    aggregator.run_once().await.unwrap();
    let second = std::fs::read(dir.path().join("cluster-latency.json")).unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reader_never_sees_a_partial_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let store = MeshStore::open(dir.path());
    let membership = SharedMembership::default();
    let names: Vec<String> = (0..40).map(|i| format!("n{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    membership.set(&refs);

    let probe = Probe::new(
        config("n0"),
        membership.clone(),
        TableMeasurer::new(&[]),
        store.clone(),
    );
    publish(&probe).await;

    let stop = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let matrix_path = store.matrix_path();
    let reader = {
        let stop = Arc::clone(&stop);
        let reads = Arc::clone(&reads);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match std::fs::read(&matrix_path) {
                    Ok(bytes) => {
                        let parsed: Result<Value, _> = serde_json::from_slice(&bytes);
                        assert!(parsed.is_ok(), "reader saw a torn matrix");
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
                }
            }
        })
    };

    let aggregator = aggregator(dir.path());
    for round in 0..50 {
        // Alternate between a wide and a narrow row so the matrix size
        // changes on every publish.
        if round % 2 == 0 {
            membership.set(&refs);
        } else {
            membership.set(&refs[..2]);
        }
        publish(&probe).await;
        aggregator.run_once().await.unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();
    assert!(reads.load(Ordering::Relaxed) > 0);
}

#[tokio::test]
async fn departed_node_leaves_matrix_once_its_row_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let store = MeshStore::open(dir.path());
    for node in ["x", "y"] {
        let probe = Probe::new(config(node), xyz(), TableMeasurer::new(&[]), store.clone());
        publish(&probe).await;
    }

    let aggregator = aggregator(dir.path());
    aggregator.run_once().await.unwrap();
    assert!(published(dir.path()).get("y").is_some());

    std::fs::remove_file(store.row_path(&id("y"))).unwrap();
    aggregator.run_once().await.unwrap();
    let matrix = published(dir.path());
    assert!(matrix.get("y").is_none());
    assert!(matrix.get("x").is_some());
}
