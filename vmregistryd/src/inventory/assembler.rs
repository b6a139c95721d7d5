use std::time::Duration;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use shared::types::VmRecord;
use crate::config::InventoryConfig;
use crate::connection::{Connection, ConnectionState};
use crate::hypervisor::DomainSummary;
use super::enumerator::{self, EnumerationError};
use super::resolver::{self, LeaseCache, ResolvedInterface};
use super::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("hypervisor connection lost")]
    ConnectionLost,

    #[error(transparent)]
    Enumeration(EnumerationError),

    #[error("snapshot not assembled within {0:?}")]
    DeadlineExceeded(Duration),
}

/// One output row before conversion to a wire record.
/// `interface` is `None` for domains without a usable interface.
struct Row {
    name: String,
    interface: Option<ResolvedInterface>,
}

/// Builds inventory snapshots. The connection is borrowed for each call.
pub struct Assembler {
    config: InventoryConfig,
}

impl Assembler {
    pub fn new(config: InventoryConfig) -> Self {
        Self { config }
    }

    /// Build a fresh snapshot, bounded by the configured request deadline.
    /// Dropping the returned future abandons all in-flight lookups.
    pub async fn build_snapshot(&self, conn: &Connection) -> Result<Snapshot, AssemblyError> {
        let deadline = Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(deadline, self.assemble(conn)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Snapshot deadline of {:?} exceeded", deadline);
                Err(AssemblyError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn assemble(&self, conn: &Connection) -> Result<Snapshot, AssemblyError> {
        if conn.state() != ConnectionState::Connected {
            return Err(AssemblyError::ConnectionLost);
        }
        let losses = conn.loss_count();

        let domains = enumerator::list_domains(conn).await.map_err(|e| {
            if e.is_connection_lost() {
                AssemblyError::ConnectionLost
            } else {
                tracing::error!("{}", e);
                AssemblyError::Enumeration(e)
            }
        })?;

        let leases = LeaseCache::new(Utc::now());
        let leases = &leases;

        // Slot per domain position; completion order does not matter
        let total = domains.len();
        let mut slots: Vec<Option<Vec<Row>>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);

        let mut pending = stream::iter(domains.into_iter().enumerate())
            .map(|(idx, summary)| async move {
                (idx, self.resolve_domain(conn, &summary, leases).await)
            })
            .buffer_unordered(self.config.max_concurrent_resolutions.max(1));

        while let Some((idx, rows)) = pending.next().await {
            slots[idx] = rows;
        }
        drop(pending);

        // Lookups degrade individually, but a session lost mid-way fails the
        // whole call, even if the supervisor has restored it by now
        if conn.loss_count() != losses {
            return Err(AssemblyError::ConnectionLost);
        }

        let mut rows: Vec<Row> = slots.into_iter().flatten().flatten().collect();
        resolver::reconcile(rows.iter_mut().filter_map(|r| r.interface.as_mut()));

        let records = rows
            .into_iter()
            .map(|row| match row.interface {
                Some(iface) => VmRecord {
                    ip: iface.ip().map(|ip| ip.to_string()).unwrap_or_default(),
                    mac: iface.mac,
                    name: row.name,
                },
                None => VmRecord {
                    name: row.name,
                    mac: String::new(),
                    ip: String::new(),
                },
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "Assembled snapshot of {} records from {} domains",
            records.len(),
            total
        );
        Ok(Snapshot::new(records))
    }

    /// Rows for one domain, or `None` if it vanished after enumeration
    async fn resolve_domain(
        &self,
        conn: &Connection,
        summary: &DomainSummary,
        leases: &LeaseCache,
    ) -> Option<Vec<Row>> {
        let domain = match enumerator::inspect(conn, summary).await {
            Ok(Some(domain)) => domain,
            Ok(None) => return None,
            // No interface was observed, so there is no MAC to report.
            // The domain is still listed; a lost session fails the call later.
            Err(e) => {
                tracing::warn!("Failed to inspect domain {}: {}", summary.name, e);
                return Some(vec![Row {
                    name: summary.name.clone(),
                    interface: None,
                }]);
            }
        };

        tracing::trace!(
            id = domain.id,
            state = %domain.state,
            interfaces = domain.interfaces.len(),
            "Inspected domain {}",
            domain.name
        );

        if domain.interfaces.is_empty() {
            return Some(vec![Row {
                name: domain.name,
                interface: None,
            }]);
        }

        let resolved =
            resolver::resolve_interfaces(conn, &domain, leases, self.config.report_all_interfaces)
                .await;

        Some(
            resolved
                .into_iter()
                .map(|iface| Row {
                    name: domain.name.clone(),
                    interface: Some(iface),
                })
                .collect(),
        )
    }
}
