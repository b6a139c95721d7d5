//! Parsers for the column-aligned tables printed by `virsh`.
//!
//! virsh pads every cell to its column width and separates columns with at
//! least two spaces, so header label offsets give the cell boundaries even
//! when a value (a domain name, an expiry timestamp) contains single spaces.

use std::net::IpAddr;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use super::{
    normalize_mac, AddressLease, DomainSummary, HypervisorError, InterfaceDescriptor,
    InterfaceKind, NeighborEntry, Result,
};

const LEASE_EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Default)]
pub struct Table {
    columns: Vec<(String, usize)>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn parse(output: &str) -> Result<Self> {
        let mut lines = output.lines().skip_while(|l| l.trim().is_empty());

        let Some(header) = lines.next() else {
            return Ok(Self::default());
        };
        let columns = header_columns(header);

        match lines.next() {
            Some(sep) if sep.trim().starts_with('-') => {}
            _ => {
                return Err(HypervisorError::Parse(format!(
                    "missing table separator after header {:?}",
                    header.trim()
                )))
            }
        }

        let rows = lines
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let chars: Vec<char> = line.chars().collect();
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, (_, start))| {
                        let end = columns.get(i + 1).map_or(chars.len(), |(_, s)| *s);
                        let start = (*start).min(chars.len());
                        let end = end.clamp(start, chars.len());
                        chars[start..end].iter().collect::<String>().trim().to_string()
                    })
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Index of the column whose header matches `label` (case-insensitive)
    pub fn column(&self, label: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(label))
            .ok_or_else(|| HypervisorError::Parse(format!("no {:?} column", label)))
    }
}

/// Splits a header line into labels and their starting char offsets.
/// A label ends at a run of two spaces.
fn header_columns(header: &str) -> Vec<(String, usize)> {
    let chars: Vec<char> = header.chars().collect();
    let mut columns = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == ' ' {
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() {
            let at_gap = chars[i] == ' ' && chars.get(i + 1).map_or(true, |c| *c == ' ');
            if at_gap {
                break;
            }
            i += 1;
        }

        let label: String = chars[start..i].iter().collect();
        columns.push((label, start));
    }

    columns
}

/// `virsh list`: active domains. Inactive rows (id "-") are skipped.
pub fn parse_domain_list(output: &str) -> Result<Vec<DomainSummary>> {
    let table = Table::parse(output)?;
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let id_col = table.column("Id")?;
    let name_col = table.column("Name")?;
    let state_col = table.column("State")?;

    let domains = table
        .rows()
        .iter()
        .filter_map(|row| {
            let id = row[id_col].parse::<u32>().ok()?;
            let name = &row[name_col];
            if name.is_empty() {
                return None;
            }
            Some(DomainSummary {
                id,
                name: name.clone(),
                state: row[state_col].clone(),
            })
        })
        .collect();

    Ok(domains)
}

/// `virsh domiflist`: interfaces in configuration order
pub fn parse_domain_interfaces(output: &str) -> Result<Vec<InterfaceDescriptor>> {
    let table = Table::parse(output)?;
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let type_col = table.column("Type")?;
    let source_col = table.column("Source")?;
    let mac_col = table.column("MAC")?;

    let interfaces = table
        .rows()
        .iter()
        .filter_map(|row| {
            let mac = normalize_mac(&row[mac_col])?;
            Some(InterfaceDescriptor {
                mac,
                source: row[source_col].clone(),
                kind: InterfaceKind::from_type(&row[type_col]),
            })
        })
        .collect();

    Ok(interfaces)
}

/// `virsh net-dhcp-leases`: leases of one virtual network
pub fn parse_dhcp_leases(output: &str, network: &str) -> Result<Vec<AddressLease>> {
    let table = Table::parse(output)?;
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let expiry_col = table.column("Expiry Time")?;
    let mac_col = table.column("MAC address")?;
    let ip_col = table.column("IP address")?;

    let leases = table
        .rows()
        .iter()
        .filter_map(|row| {
            let mac = normalize_mac(&row[mac_col])?;
            let ip = parse_address(&row[ip_col])?;
            Some(AddressLease {
                mac,
                ip,
                network: network.to_string(),
                expires: parse_expiry(&row[expiry_col]),
            })
        })
        .collect();

    Ok(leases)
}

/// `virsh domifaddr --source arp`. Continuation rows repeat the previous
/// interface with "-" in the MAC column.
pub fn parse_domain_addresses(output: &str) -> Result<Vec<NeighborEntry>> {
    let table = Table::parse(output)?;
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let mac_col = table.column("MAC address")?;
    let addr_col = table.column("Address")?;

    let mut entries = Vec::new();
    let mut current_mac: Option<String> = None;

    for row in table.rows() {
        if let Some(mac) = normalize_mac(&row[mac_col]) {
            current_mac = Some(mac);
        } else if row[mac_col] != "-" {
            current_mac = None;
        }

        let (Some(mac), Some(ip)) = (current_mac.as_ref(), parse_address(&row[addr_col])) else {
            continue;
        };
        entries.push(NeighborEntry { mac: mac.clone(), ip });
    }

    Ok(entries)
}

/// "192.168.122.10/24" -> 192.168.122.10
fn parse_address(cell: &str) -> Option<IpAddr> {
    cell.split('/').next()?.trim().parse().ok()
}

/// Lease expiry is printed in the host's local time
fn parse_expiry(cell: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(cell.trim(), LEASE_EXPIRY_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}
