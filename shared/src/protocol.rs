/// List the VM inventory
pub const LIST_VMS_PATH: &str = "/v1/vms";

/// Digest of the current inventory snapshot
pub const VMS_HASH_PATH: &str = "/v1/vms/hash";

/// Liveness probe derived from the hypervisor connection state
pub const HEALTH_PATH: &str = "/healthz";

/// Error codes carried in `ErrorReply::code`
pub const ERR_CONNECTION_LOST: &str = "ConnectionLost";
pub const ERR_ENUMERATION: &str = "EnumerationError";
pub const ERR_DEADLINE_EXCEEDED: &str = "DeadlineExceeded";
pub const ERR_INVALID_REQUEST: &str = "InvalidRequest";
