//! latmesh-probe — the per-node half of the latency mesh.
//!
//! Each cluster member runs one `Probe`. Every cycle it discovers the
//! current membership, measures RTT to every peer, and replaces its own
//! row artifact in the shared directory.
//!
//! # Architecture
//!
//! ```text
//! Probe::run (supervisory loop)
//!   ├── run_cycle() in its own task → CycleOutcome
//!   │   ├── MembershipProvider::list_members()   (kubectl / static list)
//!   │   ├── RttMeasurer::measure() per peer       (ping)
//!   │   └── MeshStore::write_row()                (temp file + rename)
//!   └── Pacer::next_sleep(outcome, elapsed)
//! ```
//!
//! # Failure handling
//!
//! A membership failure skips the cycle. A failed measurement marks only
//! that peer absent. A failed publish keeps the previous row on disk. Any
//! other error or panic inside a cycle is logged and followed by an
//! exponential back-off (30s → 300s by default); the loop never exits on
//! its own.

pub mod config;
pub mod error;
pub mod measure;
pub mod membership;
pub mod pacer;
pub mod probe;

pub use config::ProbeConfig;
pub use error::{MeasureError, MembershipError};
pub use measure::{PingMeasurer, RttMeasurer};
pub use membership::{KubectlMembership, Membership, MembershipProvider, StaticMembership};
pub use pacer::Pacer;
pub use probe::{CycleOutcome, CycleReport, Probe};
