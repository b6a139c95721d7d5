use serde::{Deserialize, Serialize};

/// A single line of the VM inventory.
/// This is the canonical wire model used by the daemon API and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    /// Domain name as known to the hypervisor
    pub name: String,

    /// MAC address of the reported interface, lowercase colon-separated.
    /// Empty only when the domain has no interfaces at all.
    pub mac: String,

    /// Currently resolved IP address, empty when no lease is resolvable
    #[serde(default)]
    pub ip: String,
}

/// Reply to the `List` operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVmReply {
    #[serde(default)]
    pub vms: Vec<VmRecord>,
}

/// Body returned with every non-2xx API response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: String,
    pub message: String,
}
