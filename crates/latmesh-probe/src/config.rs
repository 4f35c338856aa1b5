//! Probe configuration.
//!
//! Built once at process start and shared read-only with the probe loop.

use std::time::Duration;

use latmesh_state::NodeId;

pub const DEFAULT_PING_COUNT: u32 = 4;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ERROR_BACKOFF: Duration = Duration::from_secs(300);

/// Settings for one probe instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Identity this probe measures from and publishes under.
    pub node: NodeId,
    /// Echo requests sent per peer per cycle.
    pub ping_count: u32,
    /// Target length of one cycle, measurement time included.
    pub interval: Duration,
    /// Timeout for one peer measurement.
    pub ping_timeout: Duration,
    /// Timeout for one membership query.
    pub membership_timeout: Duration,
    /// Timeout for writing the row artifact.
    pub io_timeout: Duration,
    /// First sleep after a failed cycle.
    pub error_backoff: Duration,
    /// Cap for the doubling back-off.
    pub max_error_backoff: Duration,
}

impl ProbeConfig {
    /// Configuration with the default timings.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            ping_count: DEFAULT_PING_COUNT,
            interval: DEFAULT_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            membership_timeout: DEFAULT_MEMBERSHIP_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_error_backoff: DEFAULT_MAX_ERROR_BACKOFF,
        }
    }

    pub fn with_ping_count(mut self, count: u32) -> Self {
        self.ping_count = count.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_membership_timeout(mut self, timeout: Duration) -> Self {
        self.membership_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the back-off range. `max` is raised to `base` if smaller.
    pub fn with_error_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.error_backoff = base;
        self.max_error_backoff = max.max(base);
        self
    }
}
