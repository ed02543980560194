//! The `EndpointDriver` collaborator contract (spec.md §6): one
//! implementation per transfer provider (Globus, S3, local filesystem).
//! Mirrors `adapters.rs`'s shape deliberately — both are narrow
//! `async_trait` boundaries around a third-party transfer API, grounded on
//! the teacher's `transfer::adapters::ServiceAdapter` pattern.

use async_trait::async_trait;

use crate::model::StatusCode;

/// One file to move, resolved from a `FileDescriptor` plus destination
/// folder layout (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferRequest {
    pub source_path: String,
    pub destination_path: String,
    pub hash: String,
}

/// Provider-level status, polled by Mover and Manifestor (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    pub code: StatusCode,
    pub num_files: u32,
    pub num_files_transferred: u32,
    pub num_files_skipped: u32,
    pub message: String,
}

#[derive(Debug, thiserror::Error, Clone)]
#[error("endpoint driver error: {0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(msg: impl Into<String>) -> Self {
        DriverError(msg.into())
    }
}

/// A provider's ability to actually move bytes between two named endpoints
/// (spec.md §6 "External interface contracts"). Implementors are registered
/// once per provider name (e.g. "globus", "s3") and shared behind an
/// `Arc<dyn EndpointDriver>`.
#[async_trait]
pub trait EndpointDriver: Send + Sync {
    /// True once the source endpoint confirms the given files are staged
    /// and ready to move (spec.md §4.2 "FilesStaged" hand-off decision).
    async fn files_staged(
        &self,
        source_endpoint: &str,
        files: &[FileTransferRequest],
    ) -> Result<bool, DriverError>;

    /// Kicks off a transfer of `files` from `source_endpoint` to
    /// `destination_endpoint`, returning a provider task id.
    async fn transfer(
        &self,
        source_endpoint: &str,
        destination_endpoint: &str,
        files: &[FileTransferRequest],
    ) -> Result<String, DriverError>;

    /// Polls a task started by `transfer`.
    async fn status(&self, provider_task_id: &str) -> Result<ProviderStatus, DriverError>;

    /// Best-effort cancellation. Implementors should attempt the call even
    /// if the task is already terminal and treat that as success.
    async fn cancel(&self, provider_task_id: &str) -> Result<(), DriverError>;
}
