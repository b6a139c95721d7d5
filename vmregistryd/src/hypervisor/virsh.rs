use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::process::Command;
use crate::config::HypervisorConfig;
use super::{
    parse, AddressLease, DomainSummary, Hypervisor, HypervisorError, InterfaceDescriptor,
    NeighborEntry, Result,
};

/// stderr fragments meaning the session itself is gone
const CONNECTION_LOST_MARKERS: &[&str] = &[
    "failed to connect to the hypervisor",
    "end of file while reading data",
    "cannot recv data",
    "cannot write data",
    "client socket is closed",
    "no connection driver available",
    "connection reset by peer",
    "broken pipe",
];

const DOMAIN_NOT_FOUND_MARKERS: &[&str] = &["domain not found", "failed to get domain"];

/// Hypervisor backend driving the `virsh` client in `--readonly` mode.
///
/// Every call runs one short-lived virsh process, so concurrent queries never
/// share a session and need no locking. Child processes are killed when the
/// calling future is dropped.
pub struct VirshHypervisor {
    virsh_path: PathBuf,
    uri: String,
    timeout: Duration,
}

impl VirshHypervisor {
    pub fn new(config: &HypervisorConfig) -> Self {
        Self {
            virsh_path: config.virsh_path.clone(),
            uri: config.uri.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.virsh_path);
        cmd.arg("--readonly")
            .arg("--connect")
            .arg(&self.uri)
            .args(args)
            // Headers and error texts are matched literally
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::trace!(args = ?args, "virsh");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| HypervisorError::Timeout(self.timeout))?
            .map_err(|e| {
                HypervisorError::Query(format!(
                    "failed to run {}: {}",
                    self.virsh_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Map a failed virsh invocation to the error taxonomy
fn classify_failure(stderr: &str) -> HypervisorError {
    let message = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let lower = message.to_ascii_lowercase();

    if DOMAIN_NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        HypervisorError::DomainNotFound(message)
    } else if CONNECTION_LOST_MARKERS.iter().any(|m| lower.contains(m)) {
        HypervisorError::ConnectionLost(message)
    } else {
        HypervisorError::Query(message)
    }
}

#[async_trait]
impl Hypervisor for VirshHypervisor {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn ping(&self) -> Result<()> {
        // `uri` opens the session and prints the canonical endpoint
        self.run(&["uri"]).await.map(|_| ())
    }

    async fn list_domains(&self) -> Result<Vec<DomainSummary>> {
        let output = self.run(&["list"]).await?;
        parse::parse_domain_list(&output)
    }

    async fn domain_interfaces(&self, domain: &str) -> Result<Vec<InterfaceDescriptor>> {
        let output = self.run(&["domiflist", "--domain", domain]).await?;
        parse::parse_domain_interfaces(&output)
    }

    async fn network_leases(&self, network: &str) -> Result<Vec<AddressLease>> {
        let output = self.run(&["net-dhcp-leases", "--network", network]).await?;
        parse::parse_dhcp_leases(&output, network)
    }

    async fn neighbor_addresses(&self, domain: &str) -> Result<Vec<NeighborEntry>> {
        let output = self
            .run(&["domifaddr", "--domain", domain, "--source", "arp"])
            .await?;
        parse::parse_domain_addresses(&output)
    }
}
