//! MAC to IP resolution.
//!
//! Addresses come from two sources that are not updated together: the DHCP
//! lease table of each virtual network, and the neighbour (ARP) table seen by
//! a domain. Lease tables are fetched once per network per snapshot and shared
//! by every domain, so all records of one snapshot see the same leases. The
//! neighbour table is only consulted when no lease matches, and is never
//! allowed to contradict a lease (see [`reconcile`]).

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell};
use crate::connection::Connection;
use crate::hypervisor::{AddressLease, InterfaceDescriptor, InterfaceKind};
use super::enumerator::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Lease,
    Neighbor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub source: AddressSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterface {
    pub mac: String,
    /// Network or bridge the interface attaches to
    pub network: String,
    /// `None` when no address is currently resolvable
    pub address: Option<ResolvedAddress>,
}

impl ResolvedInterface {
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.map(|a| a.ip)
    }
}

/// Lease table of one network, reduced to one address per MAC.
#[derive(Debug, Default)]
pub struct LeaseTable {
    by_mac: HashMap<String, IpAddr>,
}

impl LeaseTable {
    /// Build a non-contradictory view of raw leases:
    /// expired leases are dropped, an IP claimed by several MACs belongs to
    /// the lease expiring last, and a MAC holding several leases prefers
    /// IPv4, then the lease expiring last.
    pub fn build(leases: Vec<AddressLease>, now: DateTime<Utc>) -> Self {
        let mut by_ip: HashMap<IpAddr, AddressLease> = HashMap::new();
        for mut lease in leases {
            if lease.expires.map_or(false, |e| e <= now) {
                continue;
            }
            lease.mac = lease.mac.to_ascii_lowercase();

            match by_ip.entry(lease.ip) {
                Entry::Vacant(slot) => {
                    slot.insert(lease);
                }
                Entry::Occupied(mut slot) => {
                    if ip_claim_rank(&lease) > ip_claim_rank(slot.get()) {
                        slot.insert(lease);
                    }
                }
            }
        }

        let mut by_mac: HashMap<String, AddressLease> = HashMap::new();
        for lease in by_ip.into_values() {
            match by_mac.entry(lease.mac.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(lease);
                }
                Entry::Occupied(mut slot) => {
                    if mac_lease_rank(&lease) > mac_lease_rank(slot.get()) {
                        slot.insert(lease);
                    }
                }
            }
        }

        Self {
            by_mac: by_mac.into_iter().map(|(mac, lease)| (mac, lease.ip)).collect(),
        }
    }

    pub fn lookup(&self, mac: &str) -> Option<IpAddr> {
        self.by_mac.get(&mac.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }
}

/// Leases without expiry outrank everything, then later expiry; ties go to
/// the lowest MAC so the outcome does not depend on input order.
fn expiry_rank(lease: &AddressLease) -> (bool, Option<DateTime<Utc>>) {
    (lease.expires.is_none(), lease.expires)
}

fn ip_claim_rank(lease: &AddressLease) -> ((bool, Option<DateTime<Utc>>), Reverse<&str>) {
    (expiry_rank(lease), Reverse(lease.mac.as_str()))
}

fn mac_lease_rank(lease: &AddressLease) -> (bool, (bool, Option<DateTime<Utc>>), Reverse<IpAddr>) {
    (lease.ip.is_ipv4(), expiry_rank(lease), Reverse(lease.ip))
}

/// Lease tables fetched during one snapshot, at most one fetch per network.
/// A failed fetch is remembered as "no table" for the rest of the snapshot.
pub struct LeaseCache {
    now: DateTime<Utc>,
    tables: Mutex<HashMap<String, Arc<OnceCell<Option<Arc<LeaseTable>>>>>>,
}

impl LeaseCache {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub async fn table(&self, conn: &Connection, network: &str) -> Option<Arc<LeaseTable>> {
        let cell = self
            .tables
            .lock()
            .await
            .entry(network.to_string())
            .or_default()
            .clone();

        cell.get_or_init(|| async {
            match conn.network_leases(network).await {
                Ok(leases) => {
                    let table = LeaseTable::build(leases, self.now);
                    tracing::debug!("Loaded {} leases for network {}", table.len(), network);
                    Some(Arc::new(table))
                }
                Err(e) => {
                    tracing::warn!("Failed to read leases of network {}: {}", network, e);
                    None
                }
            }
        })
        .await
        .clone()
    }
}

/// Interfaces that produce records: the primary one, or all of them.
pub fn reported_interfaces(domain: &Domain, report_all: bool) -> &[InterfaceDescriptor] {
    if report_all {
        &domain.interfaces
    } else {
        &domain.interfaces[..domain.interfaces.len().min(1)]
    }
}

/// Best-effort resolution of a domain's reported interfaces.
/// Lookup failures degrade to an absent address and are never returned.
pub async fn resolve_interfaces(
    conn: &Connection,
    domain: &Domain,
    leases: &LeaseCache,
    report_all: bool,
) -> Vec<ResolvedInterface> {
    let mut neighbors: Option<HashMap<String, IpAddr>> = None;
    let mut resolved = Vec::new();

    for iface in reported_interfaces(domain, report_all) {
        let mut address = None;

        if iface.kind == InterfaceKind::Network {
            if let Some(table) = leases.table(conn, &iface.source).await {
                address = table.lookup(&iface.mac).map(|ip| ResolvedAddress {
                    ip,
                    source: AddressSource::Lease,
                });
            }
        }

        if address.is_none() {
            if neighbors.is_none() {
                neighbors = Some(neighbor_table(conn, &domain.name).await);
            }
            address = neighbors
                .as_ref()
                .and_then(|n| n.get(&iface.mac))
                .map(|ip| ResolvedAddress {
                    ip: *ip,
                    source: AddressSource::Neighbor,
                });
        }

        if address.is_none() {
            tracing::debug!("No address for {} on domain {}", iface.mac, domain.name);
        }

        resolved.push(ResolvedInterface {
            mac: iface.mac.clone(),
            network: iface.source.clone(),
            address,
        });
    }

    resolved
}

/// First address per MAC from the domain's neighbour table, IPv4 preferred
async fn neighbor_table(conn: &Connection, domain: &str) -> HashMap<String, IpAddr> {
    let entries = match conn.neighbor_addresses(domain).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read neighbour table of {}: {}", domain, e);
            return HashMap::new();
        }
    };

    let mut table: HashMap<String, IpAddr> = HashMap::new();
    for entry in entries {
        let mac = entry.mac.to_ascii_lowercase();
        match table.entry(mac) {
            Entry::Vacant(slot) => {
                slot.insert(entry.ip);
            }
            Entry::Occupied(mut slot) => {
                if entry.ip.is_ipv4() && !slot.get().is_ipv4() {
                    slot.insert(entry.ip);
                }
            }
        }
    }
    table
}

/// Remove neighbour-derived addresses that contradict the rest of a snapshot.
///
/// Within one network an address seen in a lease belongs to the leasing
/// interface, so a neighbour entry claiming it for another MAC is stale.
/// A neighbour address claimed by two different MACs is ambiguous and
/// dropped for both.
pub fn reconcile<'a>(interfaces: impl IntoIterator<Item = &'a mut ResolvedInterface>) {
    let mut interfaces: Vec<&mut ResolvedInterface> = interfaces.into_iter().collect();

    let mut leased: HashMap<(String, IpAddr), String> = HashMap::new();
    let mut neighbor_claims: HashMap<(String, IpAddr), Vec<String>> = HashMap::new();

    for iface in interfaces.iter() {
        let Some(address) = iface.address else { continue };
        let key = (iface.network.clone(), address.ip);
        match address.source {
            AddressSource::Lease => {
                leased.insert(key, iface.mac.clone());
            }
            AddressSource::Neighbor => {
                let claims = neighbor_claims.entry(key).or_default();
                if !claims.contains(&iface.mac) {
                    claims.push(iface.mac.clone());
                }
            }
        }
    }

    for iface in interfaces.iter_mut() {
        let Some(address) = iface.address else { continue };
        if address.source != AddressSource::Neighbor {
            continue;
        }

        let key = (iface.network.clone(), address.ip);
        let lease_owner = leased.get(&key).filter(|owner| **owner != iface.mac);
        let ambiguous = neighbor_claims.get(&key).map_or(false, |c| c.len() > 1);

        if lease_owner.is_some() || ambiguous {
            tracing::debug!(
                "Dropping neighbour address {} of {}: contradicts snapshot",
                address.ip,
                iface.mac
            );
            iface.address = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::hypervisor::fake::FakeHypervisor;

    fn lease(mac: &str, ip: &str, expires: Option<DateTime<Utc>>) -> AddressLease {
        AddressLease {
            mac: mac.to_string(),
            ip: ip.parse().unwrap(),
            network: "default".to_string(),
            expires,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_lease_table_ignores_expired() {
        let now = Utc::now();
        let table = LeaseTable::build(
            vec![
                lease("aa:bb:cc:dd:ee:01", "10.0.0.5", Some(now - Duration::seconds(1))),
                lease("aa:bb:cc:dd:ee:02", "10.0.0.6", Some(now + Duration::hours(1))),
            ],
            now,
        );
        assert_eq!(table.lookup("aa:bb:cc:dd:ee:01"), None);
        assert_eq!(table.lookup("AA:BB:CC:DD:EE:02"), Some(ip("10.0.0.6")));
    }

    #[test]
    fn test_lease_table_ip_goes_to_latest_lease() {
        let now = Utc::now();
        let table = LeaseTable::build(
            vec![
                lease("aa:bb:cc:dd:ee:01", "10.0.0.5", Some(now + Duration::minutes(5))),
                lease("aa:bb:cc:dd:ee:02", "10.0.0.5", Some(now + Duration::hours(1))),
            ],
            now,
        );
        assert_eq!(table.lookup("aa:bb:cc:dd:ee:01"), None);
        assert_eq!(table.lookup("aa:bb:cc:dd:ee:02"), Some(ip("10.0.0.5")));
    }

    #[test]
    fn test_lease_table_prefers_ipv4_then_latest() {
        let now = Utc::now();
        let table = LeaseTable::build(
            vec![
                lease("aa:bb:cc:dd:ee:01", "fd00::5", None),
                lease("aa:bb:cc:dd:ee:01", "10.0.0.5", Some(now + Duration::minutes(5))),
                lease("aa:bb:cc:dd:ee:01", "10.0.0.9", Some(now + Duration::hours(1))),
            ],
            now,
        );
        assert_eq!(table.lookup("aa:bb:cc:dd:ee:01"), Some(ip("10.0.0.9")));
    }

    #[test]
    fn test_lease_table_is_independent_of_input_order() {
        let now = Utc::now();
        let leases = vec![
            lease("aa:bb:cc:dd:ee:01", "10.0.0.5", None),
            lease("aa:bb:cc:dd:ee:02", "10.0.0.5", None),
        ];
        let mut reversed = leases.clone();
        reversed.reverse();

        let a = LeaseTable::build(leases, now);
        let b = LeaseTable::build(reversed, now);
        assert_eq!(a.lookup("aa:bb:cc:dd:ee:01"), Some(ip("10.0.0.5")));
        assert_eq!(b.lookup("aa:bb:cc:dd:ee:01"), Some(ip("10.0.0.5")));
        assert_eq!(b.lookup("aa:bb:cc:dd:ee:02"), None);
    }

    fn resolved(mac: &str, addr: Option<(&str, AddressSource)>) -> ResolvedInterface {
        ResolvedInterface {
            mac: mac.to_string(),
            network: "default".to_string(),
            address: addr.map(|(a, source)| ResolvedAddress { ip: ip(a), source }),
        }
    }

    #[test]
    fn test_reconcile_lease_beats_neighbor() {
        let mut rows = vec![
            resolved("aa:bb:cc:dd:ee:01", Some(("10.0.0.5", AddressSource::Lease))),
            resolved("aa:bb:cc:dd:ee:02", Some(("10.0.0.5", AddressSource::Neighbor))),
            resolved("aa:bb:cc:dd:ee:03", Some(("10.0.0.7", AddressSource::Neighbor))),
        ];
        reconcile(rows.iter_mut());

        assert_eq!(rows[0].ip(), Some(ip("10.0.0.5")));
        assert_eq!(rows[1].ip(), None);
        assert_eq!(rows[2].ip(), Some(ip("10.0.0.7")));
    }

    #[test]
    fn test_reconcile_drops_ambiguous_neighbor_claims() {
        let mut rows = vec![
            resolved("aa:bb:cc:dd:ee:01", Some(("10.0.0.8", AddressSource::Neighbor))),
            resolved("aa:bb:cc:dd:ee:02", Some(("10.0.0.8", AddressSource::Neighbor))),
        ];
        reconcile(rows.iter_mut());
        assert!(rows.iter().all(|r| r.address.is_none()));
    }

    #[test]
    fn test_reconcile_separates_networks() {
        let mut rows = vec![
            resolved("aa:bb:cc:dd:ee:01", Some(("10.0.0.5", AddressSource::Lease))),
            ResolvedInterface {
                network: "isolated".to_string(),
                ..resolved("aa:bb:cc:dd:ee:02", Some(("10.0.0.5", AddressSource::Neighbor)))
            },
        ];
        reconcile(rows.iter_mut());
        assert_eq!(rows[1].ip(), Some(ip("10.0.0.5")));
    }

    async fn connect(fake: FakeHypervisor) -> Connection {
        Connection::connect(Arc::new(fake)).await.unwrap()
    }

    fn domain(name: &str, nics: &[(&str, &str, InterfaceKind)]) -> Domain {
        Domain {
            id: 1,
            name: name.to_string(),
            state: "running".to_string(),
            interfaces: nics
                .iter()
                .map(|(mac, source, kind)| InterfaceDescriptor {
                    mac: mac.to_string(),
                    source: source.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_resolve_primary_only_by_default() {
        let conn = connect(
            FakeHypervisor::new()
                .domain(1, "vm1", &[])
                .lease("default", "aa:bb:cc:dd:ee:01", "10.0.0.5")
                .lease("default", "aa:bb:cc:dd:ee:02", "10.0.0.6"),
        )
        .await;
        let vm = domain(
            "vm1",
            &[
                ("aa:bb:cc:dd:ee:01", "default", InterfaceKind::Network),
                ("aa:bb:cc:dd:ee:02", "default", InterfaceKind::Network),
            ],
        );
        let leases = LeaseCache::new(Utc::now());

        let primary = resolve_interfaces(&conn, &vm, &leases, false).await;
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].ip(), Some(ip("10.0.0.5")));

        let all = resolve_interfaces(&conn, &vm, &leases, true).await;
        let ips: Vec<Option<IpAddr>> = all.iter().map(|r| r.ip()).collect();
        assert_eq!(ips, vec![Some(ip("10.0.0.5")), Some(ip("10.0.0.6"))]);
    }

    #[tokio::test]
    async fn test_lease_table_fetched_once_per_network() {
        let fake = Arc::new(
            FakeHypervisor::new()
                .domain(1, "vm1", &[])
                .domain(2, "vm2", &[])
                .lease("default", "aa:bb:cc:dd:ee:01", "10.0.0.5"),
        );
        let conn = Connection::connect(fake.clone()).await.unwrap();
        let leases = LeaseCache::new(Utc::now());

        for name in ["vm1", "vm2"] {
            let vm = domain(name, &[("aa:bb:cc:dd:ee:01", "default", InterfaceKind::Network)]);
            resolve_interfaces(&conn, &vm, &leases, false).await;
        }
        assert_eq!(fake.lease_fetches(), 1);
    }

    #[tokio::test]
    async fn test_bridge_interface_uses_neighbor_table() {
        let conn = connect(
            FakeHypervisor::new()
                .domain(1, "vm1", &[])
                .neighbor("vm1", "aa:bb:cc:dd:ee:01", "fe80::1")
                .neighbor("vm1", "aa:bb:cc:dd:ee:01", "192.168.1.20"),
        )
        .await;
        let vm = domain("vm1", &[("aa:bb:cc:dd:ee:01", "br0", InterfaceKind::Bridge)]);

        let resolved = resolve_interfaces(&conn, &vm, &LeaseCache::new(Utc::now()), false).await;
        assert_eq!(
            resolved[0].address,
            Some(ResolvedAddress {
                ip: ip("192.168.1.20"),
                source: AddressSource::Neighbor
            })
        );
    }

    #[tokio::test]
    async fn test_lookup_failures_degrade_to_absent() {
        let conn = connect(
            FakeHypervisor::new()
                .domain(1, "vm1", &[])
                .fail_neighbors("vm1")
                .fail_network("default"),
        )
        .await;
        let vm = domain("vm1", &[("aa:bb:cc:dd:ee:01", "default", InterfaceKind::Network)]);

        let resolved = resolve_interfaces(&conn, &vm, &LeaseCache::new(Utc::now()), false).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].mac, "aa:bb:cc:dd:ee:01");
        assert_eq!(resolved[0].address, None);
    }
}
