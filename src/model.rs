//! Core data model: transfer specifications, file descriptors, status, and
//! the records each agent owns exclusively (spec.md §3).

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifies a logical transfer. Lives in exactly one of
/// {Stager, Mover, Manifestor}'s working set at a time, plus always in the
/// Store (spec.md §3 invariants).
pub type TransferId = Uuid;

/// The requesting user, forwarded into the manifest's `contributors` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub email: String,
    pub orcid: String,
    pub organization: Option<String>,
}

/// Either a registered database name or a parsed custom provider spec
/// (spec.md §6 "Custom destination syntax").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Destination {
    Database(String),
    Custom(CustomDestination),
}

/// `<provider>:<endpoint-uuid>:<credential-name>[/optional-path]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomDestination {
    pub provider: String,
    pub endpoint_uuid: String,
    pub credential_name: String,
    pub path: Option<String>,
}

/// Immutable once accepted (spec.md §3 "Transfer Specification").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferSpec {
    pub source: String,
    pub destination: Destination,
    pub file_ids: Vec<String>,
    pub user: User,
    pub description: String,
    pub instructions: Map<String, Value>,
    pub time_of_request: DateTime<Utc>,
}

/// An open metadata record for one source file (spec.md §3, §9 "Dynamic
/// descriptor maps"). Required keys are struct fields; everything else the
/// source database attaches rides along in `extra` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub path: String,
    pub format: String,
    pub mediatype: Option<String>,
    pub bytes: u64,
    pub hash: String,
    /// Required iff the source database exposes more than one endpoint.
    pub endpoint: Option<String>,
    pub credit: Option<String>,
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Ordering follows spec.md §3: Unknown < Staging < Active < Inactive <
/// Finalizing < Succeeded < Failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCode {
    Unknown,
    Staging,
    Active,
    Inactive,
    Finalizing,
    Succeeded,
    Failed,
}

impl StatusCode {
    /// Succeeded/Failed are monotonic: once set they are never overwritten.
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusCode::Succeeded | StatusCode::Failed)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusCode::Unknown => "Unknown",
            StatusCode::Staging => "Staging",
            StatusCode::Active => "Active",
            StatusCode::Inactive => "Inactive",
            StatusCode::Finalizing => "Finalizing",
            StatusCode::Succeeded => "Succeeded",
            StatusCode::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferStatus {
    pub code: StatusCode,
    pub message: String,
    pub num_files: u32,
    pub num_files_transferred: u32,
    pub num_files_skipped: u32,
}

impl TransferStatus {
    pub fn unknown() -> Self {
        Self {
            code: StatusCode::Unknown,
            message: String::new(),
            num_files: 0,
            num_files_transferred: 0,
            num_files_skipped: 0,
        }
    }

    /// spec.md §4.2 Store.SetStatus: reject downgrades away from a terminal
    /// code.
    pub fn allows_transition_to(&self, new_code: StatusCode) -> bool {
        !(self.code.is_terminal() && !new_code.is_terminal())
    }
}

impl PartialOrd for TransferStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.code.partial_cmp(&other.code)
    }
}

/// Owned exclusively by Store, keyed by `TransferId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub spec: TransferSpec,
    pub descriptors: Vec<FileDescriptor>,
    pub status: TransferStatus,
}

impl TransferRecord {
    pub fn payload_size(&self) -> u64 {
        self.descriptors.iter().map(|d| d.bytes).sum()
    }
}

/// Owned exclusively by Mover. A single transfer is one or more of these,
/// one per distinct source endpoint (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOperation {
    pub provider_task_id: String,
    pub source_endpoint_name: String,
    pub destination_endpoint_name: String,
    pub completed: bool,
}

/// Owned exclusively by Stager, keyed by `TransferId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingEntry {
    pub provider_staging_id: String,
}

/// Owned exclusively by Manifestor, keyed by `TransferId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub manifest_transfer_id: String,
    pub manifest_body: Vec<u8>,
    pub filename: String,
    /// The destination endpoint the manifest transfer targets, so a
    /// restart resumes polling the same driver (spec.md §5 "Durability").
    pub destination_endpoint: String,
}

/// `<user-or-custom-root>/dts-<transfer-uuid>` (spec.md §3 "Destination
/// folder layout").
pub fn destination_folder(root: &str, transfer_id: TransferId) -> String {
    format!("{root}/dts-{transfer_id}")
}

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Partitions descriptors by `endpoint`, used by Mover (spec.md §4.4) and by
/// `Dispatcher::create_transfer` to decide Stager vs. Mover hand-off.
pub fn partition_by_endpoint(
    descriptors: &[FileDescriptor],
    single_endpoint: Option<&str>,
) -> Result<HashMap<String, Vec<FileDescriptor>>, String> {
    let mut groups: HashMap<String, Vec<FileDescriptor>> = HashMap::default();
    for d in descriptors {
        let endpoint = match (single_endpoint, &d.endpoint) {
            (Some(only), _) => only.to_string(),
            (None, Some(e)) => e.clone(),
            (None, None) => {
                return Err(format!(
                    "descriptor {} is missing required 'endpoint' field on a multi-endpoint source",
                    d.id
                ));
            }
        };
        groups.entry(endpoint).or_default().push(d.clone());
    }
    Ok(groups)
}
