//! latmesh-state — shared state for the latency mesh.
//!
//! Holds the domain types exchanged between probes and the aggregator
//! (`NodeId`, `PartialRow`, `ClusterMatrix`) and the `MeshStore`, a plain
//! directory used as the write/merge bus between them.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   <node>.json                 one row per probe, written only by that probe
//!   cluster-latency.json        merged matrix, written only by the aggregator
//!   cluster-latency.meta.json   generation time and per-row observation times
//! ```
//!
//! Every artifact is written to a temp file in the same directory and
//! renamed into place, so readers see either the old or the new content.

pub mod artifacts;
pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{MeshStore, bounded};
pub use types::*;
