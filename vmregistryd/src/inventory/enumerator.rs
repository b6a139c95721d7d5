use std::collections::HashSet;
use thiserror::Error;
use crate::connection::Connection;
use crate::hypervisor::{DomainSummary, HypervisorError, InterfaceDescriptor};

#[derive(Debug, Error)]
#[error("failed to enumerate domains: {0}")]
pub struct EnumerationError(#[source] pub HypervisorError);

impl EnumerationError {
    pub fn is_connection_lost(&self) -> bool {
        self.0.is_connection_lost()
    }
}

/// A domain after inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub id: u32,
    pub name: String,
    pub state: String,
    /// Configuration order; the first entry is the primary interface
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// Active domains at call time, sorted by id then name.
pub async fn list_domains(conn: &Connection) -> Result<Vec<DomainSummary>, EnumerationError> {
    let mut domains = conn.list_domains().await.map_err(EnumerationError)?;

    domains.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
    let mut seen = HashSet::new();
    domains.retain(|d| seen.insert(d.name.clone()));

    tracing::debug!("Enumerated {} active domains", domains.len());
    Ok(domains)
}

/// Fetch the interfaces of one enumerated domain.
///
/// Returns `Ok(None)` when the domain exited after it was listed.
pub async fn inspect(
    conn: &Connection,
    summary: &DomainSummary,
) -> Result<Option<Domain>, HypervisorError> {
    let interfaces = match conn.domain_interfaces(&summary.name).await {
        Ok(interfaces) => interfaces,
        Err(HypervisorError::DomainNotFound(_)) => {
            tracing::debug!("Domain {} vanished before inspection", summary.name);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut seen = HashSet::new();
    let interfaces = interfaces
        .into_iter()
        .filter(|iface| seen.insert(iface.mac.clone()))
        .collect();

    Ok(Some(Domain {
        id: summary.id,
        name: summary.name.clone(),
        state: summary.state.clone(),
        interfaces,
    }))
}
