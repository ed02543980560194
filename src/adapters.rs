//! The `DatabaseAdapter` collaborator contract (spec.md §6), one
//! implementation per federated source/destination database. Grounded on the
//! teacher's `transfer::adapters::ServiceAdapter` trait: a narrow
//! `async_trait` boundary with a `Box<dyn Error>`-free, typed-error
//! signature, backed in production by HTTP/gRPC calls and in tests by
//! `crate::testing::MockAdapter`.

use async_trait::async_trait;

use crate::model::FileDescriptor;

/// Provider-side staging status, returned by `StagingStatus` while a Stager
/// entry is outstanding (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingStatus {
    pub succeeded: bool,
    pub failed: bool,
    pub message: String,
}

#[derive(Debug, thiserror::Error, Clone)]
#[error("database adapter error: {0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(msg: impl Into<String>) -> Self {
        AdapterError(msg.into())
    }
}

/// One federated database (spec.md §6 "External interface contracts").
/// Implementors are registered once per `databases` config entry and shared
/// across all agents behind an `Arc<dyn DatabaseAdapter>`.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Resolves file ids into full descriptors, including files this
    /// adapter did not originate (spec.md §4.2 "Descriptor resolution").
    /// `orcid` federates the caller's identity to the source database
    /// (spec.md §6 "Descriptors(orcid, fileIds)").
    async fn descriptors(
        &self,
        orcid: &str,
        file_ids: &[String],
    ) -> Result<Vec<FileDescriptor>, AdapterError>;

    /// Free-text / structured search, exposed to callers building a
    /// `TransferSpec` interactively. Not used by the agents themselves.
    async fn search(&self, query: &str) -> Result<Vec<FileDescriptor>, AdapterError>;

    /// Asks the source database to stage files for pickup (e.g. materialize
    /// a Globus-visible copy). Returns a provider-defined staging id
    /// (spec.md §6 "StageFiles(orcid, fileIds) → stagingId").
    async fn stage_files(&self, orcid: &str, file_ids: &[String]) -> Result<String, AdapterError>;

    /// Polls a previously requested staging operation.
    async fn staging_status(&self, staging_id: &str) -> Result<StagingStatus, AdapterError>;

    /// Tells the destination database a payload landed, so it can ingest or
    /// index it (spec.md §4.5 "Finalize").
    async fn finalize(
        &self,
        transfer_id: uuid::Uuid,
        manifest: &[u8],
    ) -> Result<(), AdapterError>;

    /// Maps an ORCID (or other identity the database understands) to the
    /// plain username recorded in the manifest's `username` field and used
    /// to root the destination folder layout (spec.md §3, §4.5). Adapters
    /// that don't support federation return the `"localuser"` sentinel
    /// (spec.md §9 Open Questions).
    async fn local_user(&self, orcid: &str) -> Result<String, AdapterError>;

    /// The endpoint names this database exposes, used to decide whether a
    /// descriptor's `endpoint` field is required (spec.md §4.4 partition
    /// logic: "required iff more than one endpoint name is returned here").
    async fn endpoint_names(&self) -> Result<Vec<String>, AdapterError>;
}
