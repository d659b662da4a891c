//! Records of externally provisioned cloud resources.

use serde::{Deserialize, Serialize};

/// The kinds of cloud resources a migration provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    Storage,
    Dns,
    Function,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Dns => "dns",
            Self::Function => "function",
        };
        f.write_str(s)
    }
}

/// Local record referencing one externally provisioned resource.
///
/// Owned exclusively by the job state; gateways return handles but never
/// retain them. At most one handle per kind exists in a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    /// Provider-side identifier (instance id, bucket name, record set id).
    pub external_id: String,
    /// Address the resource answers on (IP, URL, or provider URI).
    pub endpoint: String,
    /// RFC 3339 UTC timestamp of creation (or first observation).
    pub created_at: String,
}
