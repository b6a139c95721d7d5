//! In-memory hypervisor for tests, with injectable failures and delays.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use super::{
    AddressLease, DomainSummary, Hypervisor, HypervisorError, InterfaceDescriptor, InterfaceKind,
    NeighborEntry, Result,
};

#[derive(Default)]
struct FakeState {
    domains: Vec<(DomainSummary, Vec<InterfaceDescriptor>)>,
    leases: HashMap<String, Vec<AddressLease>>,
    neighbors: HashMap<String, Vec<NeighborEntry>>,
    delays: HashMap<String, Duration>,
    vanished: HashSet<String>,
    failing_neighbors: HashSet<String>,
    failing_inspections: HashSet<String>,
    failing_networks: HashSet<String>,
    dropping_networks: HashSet<String>,
    fail_listing: bool,
    connection_lost: bool,
}

#[derive(Default)]
pub struct FakeHypervisor {
    state: Mutex<FakeState>,
    lease_fetches: AtomicUsize,
    inspections_in_flight: AtomicUsize,
    peak_inspections: AtomicUsize,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// Adds a running domain whose interfaces attach to libvirt networks
    pub fn domain(self, id: u32, name: &str, nics: &[(&str, &str)]) -> Self {
        let interfaces = nics
            .iter()
            .map(|(mac, network)| InterfaceDescriptor {
                mac: mac.to_string(),
                source: network.to_string(),
                kind: InterfaceKind::Network,
            })
            .collect();
        self.domain_with(id, name, interfaces)
    }

    pub fn domain_with(self, id: u32, name: &str, interfaces: Vec<InterfaceDescriptor>) -> Self {
        let summary = DomainSummary {
            id,
            name: name.to_string(),
            state: "running".to_string(),
        };
        self.with_state(|s| s.domains.push((summary, interfaces)))
    }

    pub fn lease(self, network: &str, mac: &str, ip: &str) -> Self {
        let lease = AddressLease {
            mac: mac.to_string(),
            ip: ip.parse().unwrap(),
            network: network.to_string(),
            expires: None,
        };
        self.raw_lease(lease)
    }

    pub fn raw_lease(self, lease: AddressLease) -> Self {
        self.with_state(|s| s.leases.entry(lease.network.clone()).or_default().push(lease))
    }

    pub fn neighbor(self, domain: &str, mac: &str, ip: &str) -> Self {
        let entry = NeighborEntry {
            mac: mac.to_string(),
            ip: ip.parse().unwrap(),
        };
        self.with_state(|s| s.neighbors.entry(domain.to_string()).or_default().push(entry))
    }

    /// Delays interface inspection of one domain
    pub fn delay(self, domain: &str, delay: Duration) -> Self {
        self.with_state(|s| {
            s.delays.insert(domain.to_string(), delay);
        })
    }

    /// The domain is still listed but is gone once inspected
    pub fn vanish(self, domain: &str) -> Self {
        self.with_state(|s| {
            s.vanished.insert(domain.to_string());
        })
    }

    /// Neighbour lookups for this domain fail with a query error
    pub fn fail_neighbors(self, domain: &str) -> Self {
        self.with_state(|s| {
            s.failing_neighbors.insert(domain.to_string());
        })
    }

    /// Interface listing of this domain fails with a query error
    pub fn fail_inspection(self, domain: &str) -> Self {
        self.with_state(|s| {
            s.failing_inspections.insert(domain.to_string());
        })
    }

    /// Reading this network's leases reports a dropped session, while
    /// pings keep succeeding
    pub fn drop_on_leases(self, network: &str) -> Self {
        self.with_state(|s| {
            s.dropping_networks.insert(network.to_string());
        })
    }

    pub fn fail_network(self, network: &str) -> Self {
        self.with_state(|s| {
            s.failing_networks.insert(network.to_string());
        })
    }

    pub fn fail_listing(self) -> Self {
        self.with_state(|s| s.fail_listing = true)
    }

    pub fn set_connection_lost(&self, lost: bool) {
        self.state.lock().unwrap().connection_lost = lost;
    }

    pub fn lease_fetches(&self) -> usize {
        self.lease_fetches.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `domain_interfaces` calls seen
    pub fn peak_inspections(&self) -> usize {
        self.peak_inspections.load(Ordering::SeqCst)
    }

    fn check_connection(&self) -> Result<()> {
        if self.state.lock().unwrap().connection_lost {
            return Err(HypervisorError::ConnectionLost(
                "End of file while reading data".to_string(),
            ));
        }
        Ok(())
    }

    fn check_domain(&self, domain: &str) -> Result<()> {
        self.check_connection()?;
        let state = self.state.lock().unwrap();
        if state.vanished.contains(domain) || !state.domains.iter().any(|(d, _)| d.name == domain) {
            return Err(HypervisorError::DomainNotFound(domain.to_string()));
        }
        if state.failing_neighbors.contains(domain) {
            return Err(HypervisorError::Query(format!("lookup failed for {}", domain)));
        }
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    fn uri(&self) -> &str {
        "test:///default"
    }

    async fn ping(&self) -> Result<()> {
        self.check_connection()
    }

    async fn list_domains(&self) -> Result<Vec<DomainSummary>> {
        self.check_connection()?;
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(HypervisorError::Query("listing failed".to_string()));
        }
        Ok(state.domains.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn domain_interfaces(&self, domain: &str) -> Result<Vec<InterfaceDescriptor>> {
        let running = self.inspections_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inspections.fetch_max(running, Ordering::SeqCst);

        let delay = self.state.lock().unwrap().delays.get(domain).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inspections_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_connection()?;
        let state = self.state.lock().unwrap();
        if state.vanished.contains(domain) {
            return Err(HypervisorError::DomainNotFound(domain.to_string()));
        }
        if state.failing_inspections.contains(domain) {
            return Err(HypervisorError::Query(format!("cannot read interfaces of {}", domain)));
        }
        state
            .domains
            .iter()
            .find(|(d, _)| d.name == domain)
            .map(|(_, interfaces)| interfaces.clone())
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_string()))
    }

    async fn network_leases(&self, network: &str) -> Result<Vec<AddressLease>> {
        self.check_connection()?;
        self.lease_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.dropping_networks.contains(network) {
            return Err(HypervisorError::ConnectionLost(
                "End of file while reading data".to_string(),
            ));
        }
        if state.failing_networks.contains(network) {
            return Err(HypervisorError::Query(format!("network {} unavailable", network)));
        }
        Ok(state.leases.get(network).cloned().unwrap_or_default())
    }

    async fn neighbor_addresses(&self, domain: &str) -> Result<Vec<NeighborEntry>> {
        self.check_domain(domain)?;
        let state = self.state.lock().unwrap();
        Ok(state.neighbors.get(domain).cloned().unwrap_or_default())
    }
}
