//! latmesh-aggregator — the cluster-wide half of the latency mesh.
//!
//! Reads every row artifact currently in the mesh directory, merges them
//! into one `ClusterMatrix`, and publishes it atomically for the
//! scheduler. Nothing is carried over between passes: a node whose row
//! disappears from the directory disappears from the next matrix.
//!
//! A pass always publishes, even when the directory is empty or
//! unreadable, so consumers can tell "no data yet" from "aggregator down".

pub mod aggregator;

pub use aggregator::{AggregateReport, Aggregator, AggregatorConfig};
