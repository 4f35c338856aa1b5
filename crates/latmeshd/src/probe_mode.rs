//! Probe mode — runs on every node.
//!
//! In this mode, the daemon:
//! 1. Resolves its node identity and timings
//! 2. Picks a membership source (fixed list or kubectl)
//! 3. Measures every member each cycle and publishes its row
//! 4. On shutdown, stops between cycles

use anyhow::bail;
use tracing::info;

use latmesh_probe::{
    CycleOutcome, KubectlMembership, MembershipProvider, PingMeasurer, Probe,
    RttMeasurer, StaticMembership,
};
use latmesh_state::MeshStore;

use crate::config::ProbeArgs;

/// Run the probe until shutdown, or for a single cycle with `--once`.
pub async fn run_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let config = args.probe_config()?;
    info!(node = %config.node, "latmeshd starting in probe mode");

    let store = MeshStore::open(&args.data_dir);
    let measurer = PingMeasurer::with_program(args.ping.clone());

    match &args.peers {
        Some(list) => {
            let membership = StaticMembership::parse(list)?;
            info!(members = membership.members().len(), "using fixed member list");
            drive(Probe::new(config, membership, measurer, store), args.once).await
        }
        None => {
            info!(kubectl = %args.kubectl.display(), "discovering members through kubectl");
            let membership = KubectlMembership::with_program(args.kubectl.clone());
            drive(Probe::new(config, membership, measurer, store), args.once).await
        }
    }
}

async fn drive<M, R>(probe: Probe<M, R>, once: bool) -> anyhow::Result<()>
where
    M: MembershipProvider,
    R: RttMeasurer,
{
    if once {
        return match probe.run_cycle().await {
            CycleOutcome::Published(report) => {
                info!(
                    peers = report.peers,
                    reachable = report.reachable,
                    path = %report.path.display(),
                    "row published"
                );
                Ok(())
            }
            CycleOutcome::NoMembers => bail!("no cluster members discovered"),
            CycleOutcome::DiscoveryFailed(e) => Err(e.into()),
            CycleOutcome::PublishFailed(e) => Err(e.into()),
            CycleOutcome::Fatal(reason) => bail!("probe cycle failed: {reason}"),
        };
    }

    probe.run(crate::shutdown_channel()).await;
    info!("probe stopped");
    Ok(())
}
