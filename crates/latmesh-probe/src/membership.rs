//! Membership discovery.
//!
//! A `MembershipProvider` answers "which nodes exist right now, and where
//! can they be reached". The default provider asks Kubernetes for every
//! node's InternalIP; `StaticMembership` serves a fixed list.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use latmesh_state::NodeId;

use crate::error::MembershipError;

/// Current cluster members: identity → reachable address.
pub type Membership = BTreeMap<NodeId, String>;

/// Source of the current member list.
pub trait MembershipProvider: Send + Sync + 'static {
    /// Return the current members. Implementations should give up after
    /// roughly `timeout`.
    fn list_members(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Membership, MembershipError>> + Send;
}

/// `kubectl` output template: `name=ip name=ip ...`.
const NODE_JSONPATH: &str = r#"jsonpath={range .items[*]}{.metadata.name}={.status.addresses[?(@.type=="InternalIP")].address}{" "}{end}"#;

/// Discovers members by running `kubectl get nodes`.
#[derive(Debug, Clone)]
pub struct KubectlMembership {
    program: PathBuf,
}

impl KubectlMembership {
    /// Use `kubectl` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("kubectl")
    }

    /// Use a specific `kubectl` binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for KubectlMembership {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipProvider for KubectlMembership {
    async fn list_members(&self, timeout: Duration) -> Result<Membership, MembershipError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["get", "nodes", "-o", NODE_JSONPATH])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %self.program.display(), "querying node membership");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MembershipError::ToolMissing(self.program.display().to_string()));
            }
            Ok(Err(e)) => return Err(MembershipError::Io(e)),
            Err(_) => return Err(MembershipError::Timeout(timeout)),
        };

        if !output.status.success() {
            return Err(MembershipError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_member_list(&String::from_utf8_lossy(&output.stdout))
    }
}

/// A fixed member list.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    members: Membership,
}

impl StaticMembership {
    pub fn new(members: Membership) -> Self {
        Self { members }
    }

    /// Parse `name=address` pairs separated by commas or whitespace.
    ///
    /// Unlike discovery output, every pair must be valid.
    pub fn parse(list: &str) -> Result<Self, MembershipError> {
        let mut members = Membership::new();
        for pair in list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let (node, address) = parse_pair(pair)?;
            members.insert(node, address);
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &Membership {
        &self.members
    }
}

impl MembershipProvider for StaticMembership {
    async fn list_members(&self, _timeout: Duration) -> Result<Membership, MembershipError> {
        Ok(self.members.clone())
    }
}

/// Parse whitespace-separated `name=address` pairs from discovery output.
///
/// Nodes without an address (no InternalIP) are skipped with a warning.
/// Empty output is an empty membership; output with no usable pair at all
/// is malformed.
pub fn parse_member_list(output: &str) -> Result<Membership, MembershipError> {
    let mut members = Membership::new();
    let mut rejected = Vec::new();

    for token in output.split_whitespace() {
        match parse_pair(token) {
            Ok((node, address)) => {
                if let Some(previous) = members.insert(node.clone(), address) {
                    warn!(%node, %previous, "duplicate node in membership, keeping last address");
                }
            }
            Err(e) => {
                warn!(%token, error = %e, "ignoring membership entry");
                rejected.push(token.to_string());
            }
        }
    }

    if members.is_empty() && !rejected.is_empty() {
        return Err(MembershipError::Malformed(format!(
            "no usable name=address pair in {rejected:?}"
        )));
    }
    Ok(members)
}

fn parse_pair(pair: &str) -> Result<(NodeId, String), MembershipError> {
    let (name, address) = pair
        .split_once('=')
        .ok_or_else(|| MembershipError::Malformed(format!("expected name=address, got {pair:?}")))?;

    if address.is_empty() {
        return Err(MembershipError::Malformed(format!("no address for node {name:?}")));
    }
    let node = NodeId::new(name).map_err(|e| MembershipError::Malformed(e.to_string()))?;
    Ok((node, address.to_string()))
}
