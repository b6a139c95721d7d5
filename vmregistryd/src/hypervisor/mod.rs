//! Read-only boundary to the hypervisor management interface.
//!
//! The inventory core only talks to the [`Hypervisor`] trait. The production
//! backend drives `virsh` in read-only mode; tests use an in-memory fake.

pub mod parse;
pub mod virsh;

#[cfg(test)]
pub mod fake;

use std::net::IpAddr;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HypervisorError>;

#[derive(Debug, Error)]
pub enum HypervisorError {
    /// The session to the hypervisor dropped or could not be established
    #[error("hypervisor connection lost: {0}")]
    ConnectionLost(String),

    /// The domain went away between two calls
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("hypervisor query failed: {0}")]
    Query(String),

    #[error("hypervisor command timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected hypervisor output: {0}")]
    Parse(String),
}

impl HypervisorError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, HypervisorError::ConnectionLost(_))
    }
}

/// An active domain as returned by enumeration, before inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSummary {
    pub id: u32,
    pub name: String,
    /// Hypervisor-reported state, e.g. "running" or "paused"
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    /// Attached to a hypervisor-managed virtual network with its own lease table
    Network,
    Bridge,
    Other,
}

impl InterfaceKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "network" => InterfaceKind::Network,
            "bridge" => InterfaceKind::Bridge,
            _ => InterfaceKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// Normalised lowercase MAC, see [`normalize_mac`]
    pub mac: String,
    /// Virtual network or bridge the interface attaches to
    pub source: String,
    pub kind: InterfaceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLease {
    pub mac: String,
    pub ip: IpAddr,
    pub network: String,
    /// `None` for leases without an expiry (static reservations)
    pub expires: Option<DateTime<Utc>>,
}

/// A MAC/IP pair seen in a domain's neighbour (ARP) table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub mac: String,
    pub ip: IpAddr,
}

#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Endpoint this backend talks to
    fn uri(&self) -> &str;

    /// Cheap round-trip proving the session is usable
    async fn ping(&self) -> Result<()>;

    /// Currently active domains, in whatever order the hypervisor reports them
    async fn list_domains(&self) -> Result<Vec<DomainSummary>>;

    /// Interfaces of one domain in configuration order
    async fn domain_interfaces(&self, domain: &str) -> Result<Vec<InterfaceDescriptor>>;

    /// DHCP leases handed out on one virtual network
    async fn network_leases(&self, network: &str) -> Result<Vec<AddressLease>>;

    async fn neighbor_addresses(&self, domain: &str) -> Result<Vec<NeighborEntry>>;
}

/// Canonical form of a hardware address: six lowercase hex pairs joined by ':'.
/// Returns `None` for anything that is not a MAC (e.g. virsh's "-" placeholder).
pub fn normalize_mac(mac: &str) -> Option<String> {
    let mac = mac.trim();
    let parts: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return None;
    }

    let valid = parts
        .iter()
        .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return None;
    }

    Some(parts.join(":").to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("52:54:00:AB:cd:0F").as_deref(),
            Some("52:54:00:ab:cd:0f")
        );
        assert_eq!(
            normalize_mac("52-54-00-ab-cd-0f").as_deref(),
            Some("52:54:00:ab:cd:0f")
        );
        assert_eq!(normalize_mac("-"), None);
        assert_eq!(normalize_mac("52:54:00:ab:cd"), None);
        assert_eq!(normalize_mac("52:54:00:ab:cd:zz"), None);
    }

    #[test]
    fn test_interface_kind() {
        assert_eq!(InterfaceKind::from_type("network"), InterfaceKind::Network);
        assert_eq!(InterfaceKind::from_type("bridge"), InterfaceKind::Bridge);
        assert_eq!(InterfaceKind::from_type("direct"), InterfaceKind::Other);
    }
}
