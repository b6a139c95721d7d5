use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use crate::hypervisor::{
    self, AddressLease, DomainSummary, Hypervisor, HypervisorError, InterfaceDescriptor,
    NeighborEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Lost,
}

/// Startup failure: the process cannot serve without a hypervisor session
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid hypervisor URI {0:?}")]
    InvalidUri(String),

    #[error("failed to connect to {uri}: {source}")]
    Unreachable {
        uri: String,
        #[source]
        source: HypervisorError,
    },
}

/// The single read-only hypervisor session of the process.
///
/// All hypervisor calls go through here so that a dropped session is noticed
/// once and flips the state to `Lost`; the supervisor moves it back to
/// `Connected` after a successful ping.
pub struct Connection {
    hypervisor: Arc<dyn Hypervisor>,
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped on every observed loss, even while already `Lost`
    losses: AtomicU64,
}

impl Connection {
    /// Open the session. Fails fast on a malformed URI or an unreachable endpoint.
    pub async fn connect(hypervisor: Arc<dyn Hypervisor>) -> Result<Self, ConnectionError> {
        let uri = hypervisor.uri().to_string();
        validate_uri(&uri)?;

        let (state_tx, _) = watch::channel(ConnectionState::Unconnected);

        hypervisor
            .ping()
            .await
            .map_err(|source| ConnectionError::Unreachable {
                uri: uri.clone(),
                source,
            })?;

        state_tx.send_replace(ConnectionState::Connected);
        tracing::info!("Connected to hypervisor at {}", uri);

        Ok(Self {
            hypervisor,
            state_tx,
            losses: AtomicU64::new(0),
        })
    }

    pub fn uri(&self) -> &str {
        self.hypervisor.uri()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Number of connection losses observed so far.
    /// A caller that records it before a series of calls can tell whether
    /// the session dropped in between, even if it was restored since.
    pub fn loss_count(&self) -> u64 {
        self.losses.load(Ordering::SeqCst)
    }

    pub fn mark_lost(&self, reason: &str) {
        self.losses.fetch_add(1, Ordering::SeqCst);
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Lost {
                return false;
            }
            *state = ConnectionState::Lost;
            true
        });
        if changed {
            tracing::warn!("Hypervisor connection lost: {}", reason);
        }
    }

    /// Ping the hypervisor and update the state accordingly.
    /// This is the rebuild hook used by the supervisor.
    pub async fn probe(&self) -> ConnectionState {
        match self.observe(self.hypervisor.ping().await) {
            Ok(()) => {
                let restored = self.state_tx.send_if_modified(|state| {
                    if *state == ConnectionState::Connected {
                        return false;
                    }
                    *state = ConnectionState::Connected;
                    true
                });
                if restored {
                    tracing::info!("Hypervisor connection restored");
                }
            }
            Err(e) if !e.is_connection_lost() => {
                tracing::warn!("Hypervisor ping failed: {}", e);
            }
            Err(_) => {}
        }
        self.state()
    }

    fn observe<T>(&self, result: hypervisor::Result<T>) -> hypervisor::Result<T> {
        if let Err(HypervisorError::ConnectionLost(reason)) = &result {
            self.mark_lost(reason);
        }
        result
    }

    pub async fn list_domains(&self) -> hypervisor::Result<Vec<DomainSummary>> {
        self.observe(self.hypervisor.list_domains().await)
    }

    pub async fn domain_interfaces(
        &self,
        domain: &str,
    ) -> hypervisor::Result<Vec<InterfaceDescriptor>> {
        self.observe(self.hypervisor.domain_interfaces(domain).await)
    }

    pub async fn network_leases(&self, network: &str) -> hypervisor::Result<Vec<AddressLease>> {
        self.observe(self.hypervisor.network_leases(network).await)
    }

    pub async fn neighbor_addresses(&self, domain: &str) -> hypervisor::Result<Vec<NeighborEntry>> {
        self.observe(self.hypervisor.neighbor_addresses(domain).await)
    }
}

/// Accepts libvirt URIs such as `qemu:///system` or `qemu+ssh://host/system`
fn validate_uri(uri: &str) -> Result<(), ConnectionError> {
    let parsed = url::Url::parse(uri).map_err(|e| {
        tracing::debug!("Rejected hypervisor URI {:?}: {}", uri, e);
        ConnectionError::InvalidUri(uri.to_string())
    })?;

    // `qemu:` parses as an empty opaque path, which names no driver instance
    if parsed.cannot_be_a_base() && parsed.path().is_empty() {
        return Err(ConnectionError::InvalidUri(uri.to_string()));
    }
    Ok(())
}
