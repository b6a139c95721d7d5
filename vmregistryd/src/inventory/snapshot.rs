use sha2::{Digest, Sha256};
use shared::types::{ListVmReply, VmRecord};

/// Point-in-time inventory: records in enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    records: Vec<VmRecord>,
}

impl Snapshot {
    pub fn new(records: Vec<VmRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[VmRecord] {
        &self.records
    }

    /// SHA-256 over the ordered records, hex encoded.
    /// Equal snapshots hash equal; reordering changes the digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for record in &self.records {
            for field in [&record.name, &record.mac, &record.ip] {
                hasher.update((field.len() as u64).to_be_bytes());
                hasher.update(field.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn into_reply(self) -> ListVmReply {
        ListVmReply { vms: self.records }
    }
}
