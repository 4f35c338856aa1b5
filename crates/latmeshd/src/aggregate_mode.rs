//! Aggregate mode — builds the cluster matrix from the published rows.
//!
//! Without `--interval` it runs one pass and exits, which suits a CronJob.
//! With it, the matrix is republished every interval until shutdown.

use tracing::info;

use latmesh_aggregator::Aggregator;
use latmesh_state::MeshStore;

use crate::config::AggregateArgs;

pub async fn run_aggregate(args: AggregateArgs) -> anyhow::Result<()> {
    let config = args.aggregator_config();
    let aggregator = Aggregator::new(MeshStore::open(args.data_dir.clone()), config);

    match args.interval() {
        None => {
            info!(dir = %args.data_dir.display(), "latmeshd running a single aggregation pass");
            let report = aggregator.run_once().await?;
            if !report.skipped.is_empty() {
                info!(skipped = ?report.skipped, "some row artifacts were not merged");
            }
            Ok(())
        }
        Some(interval) => {
            info!(dir = %args.data_dir.display(), "latmeshd starting in aggregate mode");
            aggregator.run(interval, crate::shutdown_channel()).await;
            info!("aggregator stopped");
            Ok(())
        }
    }
}
