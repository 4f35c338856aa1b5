//! RTT measurement.
//!
//! `PingMeasurer` shells out to the system `ping` and parses its summary
//! lines. Both iputils (`rtt min/avg/max/mdev = ...`) and BSD/BusyBox
//! (`round-trip min/avg/max = ...`) summaries are understood.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use latmesh_state::RttSample;

use crate::error::MeasureError;

/// Extra time given to the ping process beyond its own reply timeout.
const PROCESS_GRACE: Duration = Duration::from_secs(2);

/// Measures round-trip time to one address.
pub trait RttMeasurer: Send + Sync + 'static {
    /// Send `count` probes to `address`. Implementations should give up
    /// after roughly `timeout`.
    fn measure(
        &self,
        address: &str,
        count: u32,
        timeout: Duration,
    ) -> impl Future<Output = Result<RttSample, MeasureError>> + Send;
}

/// Measures with the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingMeasurer {
    program: PathBuf,
}

impl PingMeasurer {
    /// Use `ping` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("ping")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PingMeasurer {
    fn default() -> Self {
        Self::new()
    }
}

impl RttMeasurer for PingMeasurer {
    async fn measure(
        &self,
        address: &str,
        count: u32,
        timeout: Duration,
    ) -> Result<RttSample, MeasureError> {
        if address.is_empty() || address.starts_with('-') {
            return Err(MeasureError::InvalidAddress(address.to_string()));
        }

        // `-W` takes whole seconds.
        let wait_secs = timeout.as_secs().max(1);
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(count.max(1).to_string())
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(address)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let limit = timeout + PROCESS_GRACE;
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MeasureError::ToolMissing(self.program.display().to_string()));
            }
            Ok(Err(e)) => return Err(MeasureError::Io(e)),
            Err(_) => return Err(MeasureError::Timeout(limit)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%address, status = ?output.status.code(), "ping finished");

        parse_ping_output(&stdout, &stderr)
    }
}

const LOSS_PATTERN: &str = r"([0-9.]+)% packet loss";
const RTT_PATTERN: &str =
    r"(?:rtt|round-trip) min/avg/max(?:/\S+)?\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)";

/// Extract loss and min/avg/max from ping output.
///
/// No summary line means no reply was received, which is reported as
/// `Unreachable` with whatever loss figure was printed.
pub fn parse_ping_output(stdout: &str, stderr: &str) -> Result<RttSample, MeasureError> {
    let loss_re = Regex::new(LOSS_PATTERN)?;
    let rtt_re = Regex::new(RTT_PATTERN)?;

    let loss_percent = loss_re
        .captures(stdout)
        .or_else(|| loss_re.captures(stderr))
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(|loss| loss.round().clamp(0.0, 100.0) as u8);

    let Some(caps) = rtt_re.captures(stdout) else {
        return Err(MeasureError::Unreachable { loss_percent });
    };

    let field = |i: usize| caps[i].parse::<f64>().ok();
    match (field(1), field(2), field(3)) {
        (Some(min_ms), Some(avg_ms), Some(max_ms)) => Ok(RttSample {
            loss_percent,
            min_ms,
            avg_ms,
            max_ms,
        }),
        _ => Err(MeasureError::Unreachable { loss_percent }),
    }
}
