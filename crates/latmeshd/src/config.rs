//! Command-line and environment configuration.
//!
//! Flags fall back to environment variables, then to defaults. The parsed
//! arguments are turned into immutable `ProbeConfig` / `AggregatorConfig`
//! values once, before any loop starts.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use latmesh_aggregator::AggregatorConfig;
use latmesh_probe::ProbeConfig;
use latmesh_state::NodeId;

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Identity of this node. Defaults to the host name.
    #[arg(long, env = "NODE_NAME")]
    pub node: Option<NodeId>,

    /// Directory shared by probes and the aggregator.
    #[arg(long, env = "LATENCY_DIR", default_value = "/latency")]
    pub data_dir: PathBuf,

    /// Echo requests per peer per cycle.
    #[arg(long, env = "PING_COUNT", default_value_t = 4)]
    pub ping_count: u32,

    /// Cycle length in seconds.
    #[arg(long, env = "SLEEP_INTERVAL", default_value_t = 60)]
    pub interval: u64,

    /// Per-peer measurement timeout in seconds.
    #[arg(long, env = "PING_TIMEOUT", default_value_t = 15)]
    pub ping_timeout: u64,

    /// Membership query timeout in seconds.
    #[arg(long, env = "KUBECTL_TIMEOUT", default_value_t = 10)]
    pub membership_timeout: u64,

    /// Row write timeout in seconds.
    #[arg(long, env = "IO_TIMEOUT", default_value_t = 10)]
    pub io_timeout: u64,

    /// Sleep after a failed cycle, in seconds. Doubles per consecutive failure.
    #[arg(long, env = "ERROR_BACKOFF", default_value_t = 30)]
    pub error_backoff: u64,

    /// Cap for the failure back-off, in seconds.
    #[arg(long, env = "MAX_ERROR_BACKOFF", default_value_t = 300)]
    pub max_error_backoff: u64,

    /// Fixed member list (`name=address,...`) instead of asking kubectl.
    #[arg(long, env = "MESH_PEERS")]
    pub peers: Option<String>,

    /// kubectl binary used for membership discovery.
    #[arg(long, env = "KUBECTL", default_value = "kubectl")]
    pub kubectl: PathBuf,

    /// ping binary used for measurement.
    #[arg(long, env = "PING", default_value = "ping")]
    pub ping: PathBuf,

    /// Run a single cycle and exit.
    #[arg(long)]
    pub once: bool,
}

impl ProbeArgs {
    /// Build the probe configuration, resolving the node identity.
    pub fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        let node = match &self.node {
            Some(node) => node.clone(),
            None => host_node_id()?,
        };

        Ok(ProbeConfig::new(node)
            .with_ping_count(self.ping_count)
            .with_interval(Duration::from_secs(self.interval))
            .with_ping_timeout(Duration::from_secs(self.ping_timeout))
            .with_membership_timeout(Duration::from_secs(self.membership_timeout))
            .with_io_timeout(Duration::from_secs(self.io_timeout))
            .with_error_backoff(
                Duration::from_secs(self.error_backoff),
                Duration::from_secs(self.max_error_backoff),
            ))
    }
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    /// Directory shared by probes and the aggregator.
    #[arg(long, env = "LATENCY_DIR", default_value = "/latency")]
    pub data_dir: PathBuf,

    /// Repeat every N seconds. Without it, run a single pass and exit.
    #[arg(long, env = "AGGREGATE_INTERVAL")]
    pub interval: Option<u64>,

    /// Per-artifact read and publish timeout in seconds.
    #[arg(long, env = "IO_TIMEOUT", default_value_t = 10)]
    pub io_timeout: u64,

    /// Ignore rows older than N seconds.
    #[arg(long, env = "MAX_ROW_AGE")]
    pub max_row_age: Option<u64>,

    /// Delete abandoned temp files older than N seconds.
    #[arg(long, env = "TEMP_MAX_AGE", default_value_t = 600)]
    pub temp_max_age: u64,
}

impl AggregateArgs {
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            io_timeout: Duration::from_secs(self.io_timeout),
            max_row_age: self.max_row_age.map(Duration::from_secs),
            temp_max_age: Duration::from_secs(self.temp_max_age),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

/// Node identity from the host name, as Kubernetes sets it for pods on
/// the host network.
fn host_node_id() -> anyhow::Result<NodeId> {
    let name = match std::env::var("HOSTNAME") {
        Ok(name) if !name.trim().is_empty() => name,
        _ => std::fs::read_to_string("/etc/hostname")
            .map_err(|e| anyhow::anyhow!("no --node/NODE_NAME given and host name unavailable: {e}"))?,
    };
    Ok(NodeId::new(name.trim())?)
}
