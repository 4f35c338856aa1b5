//! Probe — the per-node measurement loop.
//!
//! One cycle discovers members, measures every peer, and replaces this
//! node's row artifact. `Probe::run` repeats cycles forever, running each
//! one in its own task so that an error or panic inside a cycle only costs
//! that cycle.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use latmesh_state::{MeshStore, NodeId, PartialRow, RttSample, StateError, bounded};

use crate::config::ProbeConfig;
use crate::error::{MeasureError, MembershipError};
use crate::measure::RttMeasurer;
use crate::membership::{Membership, MembershipProvider};
use crate::pacer::Pacer;

/// Slack added on top of a provider's own timeout before the probe gives
/// up on it.
const CALL_SLACK: Duration = Duration::from_secs(3);

/// What happened in one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A fresh row was written.
    Published(CycleReport),
    /// Discovery returned no members; nothing was measured or written.
    NoMembers,
    /// Discovery failed; nothing was measured or written.
    DiscoveryFailed(MembershipError),
    /// The row could not be written; the previous row stays in place.
    PublishFailed(StateError),
    /// The cycle errored or panicked unexpectedly.
    Fatal(String),
}

impl CycleOutcome {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Published(_) => "published",
            Self::NoMembers => "no_members",
            Self::DiscoveryFailed(_) => "discovery_failed",
            Self::PublishFailed(_) => "publish_failed",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// Summary of a published cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Peers measured (self excluded).
    pub peers: usize,
    /// Peers with a usable RTT.
    pub reachable: usize,
    /// Where the row was written.
    pub path: PathBuf,
}

/// Measures this node's row of the latency matrix.
pub struct Probe<M, R> {
    config: Arc<ProbeConfig>,
    membership: Arc<M>,
    measurer: Arc<R>,
    store: MeshStore,
}

impl<M, R> Clone for Probe<M, R> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            membership: Arc::clone(&self.membership),
            measurer: Arc::clone(&self.measurer),
            store: self.store.clone(),
        }
    }
}

impl<M: MembershipProvider, R: RttMeasurer> Probe<M, R> {
    pub fn new(config: ProbeConfig, membership: M, measurer: R, store: MeshStore) -> Self {
        Self {
            config: Arc::new(config),
            membership: Arc::new(membership),
            measurer: Arc::new(measurer),
            store,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn node(&self) -> &NodeId {
        &self.config.node
    }

    /// Run one discover → measure → publish cycle.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let node = self.node();

        info!(%node, "discovering cluster membership");
        let members = match self.discover().await {
            Ok(members) => members,
            Err(e) => {
                warn!(%node, error = %e, "membership discovery failed, skipping cycle");
                return CycleOutcome::DiscoveryFailed(e);
            }
        };

        if members.is_empty() {
            warn!(%node, "no members discovered, skipping cycle");
            return CycleOutcome::NoMembers;
        }
        if !members.contains_key(node) {
            warn!(%node, members = members.len(), "this node is not in the membership list");
        }
        info!(%node, members = members.len(), "membership discovered");

        let row = self.measure_row(&members).await;
        let peers = row.len() - 1;
        let reachable = row.reachable();

        let store = self.store.clone();
        match bounded(self.config.io_timeout, move || store.write_row(&row)).await {
            Ok(path) => {
                info!(%node, path = %path.display(), peers, reachable, "latency row published");
                CycleOutcome::Published(CycleReport {
                    peers,
                    reachable,
                    path,
                })
            }
            Err(e) => {
                error!(%node, error = %e, "failed to publish latency row");
                CycleOutcome::PublishFailed(e)
            }
        }
    }

    /// Build this cycle's row from a membership list.
    ///
    /// Self is 0 and never measured. Every other member is measured in
    /// turn; a failure marks only that member absent.
    pub async fn measure_row(&self, members: &Membership) -> PartialRow {
        let node = self.node();
        let mut row = PartialRow::new(node.clone());

        for (peer, address) in members {
            if peer == node {
                continue;
            }

            let rtt = match self.measure_peer(address).await {
                Ok(sample) => {
                    match sample.rtt() {
                        Some(avg_ms) => info!(
                            %node, %peer, %address,
                            loss_percent = ?sample.loss_percent,
                            avg_ms,
                            "peer measured"
                        ),
                        None => warn!(
                            %node, %peer, %address,
                            loss_percent = ?sample.loss_percent,
                            "peer measured without a usable average"
                        ),
                    }
                    sample.rtt()
                }
                Err(e) => {
                    warn!(%node, %peer, %address, error = %e, "peer measurement failed, marking absent");
                    None
                }
            };
            row.record(peer.clone(), rtt);
        }

        row
    }

    /// Run cycles until `shutdown` flips, sleeping between them as the
    /// `Pacer` decides.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let node = self.node();
        let mut pacer = Pacer::new(&self.config);

        info!(
            %node,
            interval_secs = self.config.interval.as_secs(),
            ping_count = self.config.ping_count,
            store = %self.store.dir().display(),
            "probe started"
        );

        loop {
            let started = Instant::now();
            let probe = self.clone();
            let outcome = match tokio::spawn(async move { probe.run_cycle().await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(%node, error = %e, "probe cycle aborted");
                    CycleOutcome::Fatal(e.to_string())
                }
            };

            let sleep = pacer.next_sleep(&outcome, started.elapsed());
            info!(
                %node,
                outcome = outcome.kind(),
                elapsed_secs = started.elapsed().as_secs_f64(),
                sleep_secs = sleep.as_secs_f64(),
                "cycle finished"
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => {
                    info!(%node, "probe shutting down");
                    break;
                }
            }
        }
    }

    async fn discover(&self) -> Result<Membership, MembershipError> {
        let timeout = self.config.membership_timeout;
        guarded(timeout, self.membership.list_members(timeout))
            .await
            .unwrap_or(Err(MembershipError::Timeout(timeout)))
    }

    async fn measure_peer(&self, address: &str) -> Result<RttSample, MeasureError> {
        let timeout = self.config.ping_timeout;
        guarded(
            timeout,
            self.measurer
                .measure(address, self.config.ping_count, timeout),
        )
        .await
        .unwrap_or(Err(MeasureError::Timeout(timeout)))
    }
}

/// Bound a provider call to its timeout plus `CALL_SLACK`. `None` means the
/// provider overran.
async fn guarded<F: Future>(timeout: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(timeout + CALL_SLACK, fut).await.ok()
}
