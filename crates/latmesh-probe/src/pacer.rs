//! Cycle pacing and back-off.
//!
//! Decides how long the probe sleeps after each cycle, based only on the
//! cycle's outcome and how long it took.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::probe::CycleOutcome;

/// Tracks consecutive failed cycles and the current back-off.
#[derive(Debug)]
pub struct Pacer {
    /// Target cycle length.
    interval: Duration,
    /// Back-off after the first failed cycle.
    base_backoff: Duration,
    /// Maximum back-off.
    max_backoff: Duration,
    /// Back-off to use for the next failed cycle.
    current_backoff: Duration,
    /// Consecutive failed cycles.
    consecutive_failures: u32,
}

impl Pacer {
    pub fn new(config: &ProbeConfig) -> Self {
        Self::with_backoff(
            config.interval,
            config.error_backoff,
            config.max_error_backoff,
        )
    }

    pub fn with_backoff(interval: Duration, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            interval,
            base_backoff,
            max_backoff: max_backoff.max(base_backoff),
            current_backoff: base_backoff,
            consecutive_failures: 0,
        }
    }

    /// Sleep to take after a cycle that ended with `outcome` after
    /// `elapsed`.
    ///
    /// - published (or failed to publish): the rest of the interval, never
    ///   negative;
    /// - nothing to measure (discovery failed or no members): the full
    ///   interval;
    /// - fatal: the current back-off, which then doubles up to the cap.
    pub fn next_sleep(&mut self, outcome: &CycleOutcome, elapsed: Duration) -> Duration {
        if let CycleOutcome::Fatal(_) = outcome {
            let sleep = self.current_backoff;
            self.consecutive_failures += 1;
            self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
            warn!(
                failures = self.consecutive_failures,
                backoff_secs = sleep.as_secs_f64(),
                "backing off after failed cycle"
            );
            return sleep;
        }

        if self.consecutive_failures > 0 {
            debug!(failures = self.consecutive_failures, "cycle recovered, back-off reset");
        }
        self.consecutive_failures = 0;
        self.current_backoff = self.base_backoff;

        match outcome {
            CycleOutcome::Published(_) | CycleOutcome::PublishFailed(_) => {
                self.interval.saturating_sub(elapsed)
            }
            _ => self.interval,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Back-off the next failed cycle would use.
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use latmesh_state::StateError;

    use super::*;
    use crate::error::MembershipError;
    use crate::probe::CycleReport;

    fn pacer() -> Pacer {
        Pacer::with_backoff(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Duration::from_secs(300),
        )
    }

    fn published() -> CycleOutcome {
        CycleOutcome::Published(CycleReport {
            peers: 2,
            reachable: 2,
            path: PathBuf::from("/latency/a.json"),
        })
    }

    fn fatal() -> CycleOutcome {
        CycleOutcome::Fatal("boom".to_string())
    }

    #[test]
    fn published_sleeps_rest_of_interval() {
        let mut pacer = pacer();
        assert_eq!(
            pacer.next_sleep(&published(), Duration::from_secs(20)),
            Duration::from_secs(40)
        );
    }

    #[test]
    fn overlong_cycle_never_sleeps_negative() {
        let mut pacer = pacer();
        assert_eq!(
            pacer.next_sleep(&published(), Duration::from_secs(95)),
            Duration::ZERO
        );
    }

    #[test]
    fn publish_failure_still_paces_to_interval() {
        let mut pacer = pacer();
        let outcome = CycleOutcome::PublishFailed(StateError::Timeout(Duration::from_secs(1)));
        assert_eq!(
            pacer.next_sleep(&outcome, Duration::from_secs(10)),
            Duration::from_secs(50)
        );
    }

    #[test]
    fn discovery_failure_sleeps_full_interval() {
        let mut pacer = pacer();
        let outcome = CycleOutcome::DiscoveryFailed(MembershipError::Timeout(Duration::from_secs(10)));
        assert_eq!(
            pacer.next_sleep(&outcome, Duration::from_secs(10)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn no_members_sleeps_full_interval() {
        let mut pacer = pacer();
        assert_eq!(
            pacer.next_sleep(&CycleOutcome::NoMembers, Duration::from_secs(3)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn fatal_backs_off_exponentially_to_cap() {
        let mut pacer = pacer();
        let sleeps: Vec<u64> = (0..6)
            .map(|_| pacer.next_sleep(&fatal(), Duration::ZERO).as_secs())
            .collect();
        assert_eq!(sleeps, vec![30, 60, 120, 240, 300, 300]);
        assert_eq!(pacer.consecutive_failures(), 6);
    }

    #[test]
    fn success_resets_backoff() {
        let mut pacer = pacer();
        pacer.next_sleep(&fatal(), Duration::ZERO);
        pacer.next_sleep(&fatal(), Duration::ZERO);
        assert_eq!(pacer.current_backoff(), Duration::from_secs(120));

        pacer.next_sleep(&published(), Duration::ZERO);
        assert_eq!(pacer.consecutive_failures(), 0);
        assert_eq!(pacer.current_backoff(), Duration::from_secs(30));
        assert_eq!(
            pacer.next_sleep(&fatal(), Duration::ZERO),
            Duration::from_secs(30)
        );
    }
}
