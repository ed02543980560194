//! Error taxonomy (spec.md §7), grounded on the teacher's
//! `transfer::error::TransferError` shape: one `thiserror` enum per kind,
//! not per call site.

use thiserror::Error;
use uuid::Uuid;

use crate::destination::DestinationParseError;

/// Errors the Store can produce. Never logged as critical (spec.md §7
/// "Not-found").
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("transfer {0} not found")]
    TransferNotFound(Uuid),

    #[error("spec has no file ids")]
    EmptyFileIds,

    #[error("source database adapter failed resolving descriptors: {0}")]
    DescriptorResolution(String),

    #[error("rejected status downgrade from terminal state for transfer {0}")]
    TerminalStatusDowngrade(Uuid),
}

/// Errors surfaced by Stager/Mover/Manifestor while driving provider calls.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("descriptor {descriptor_id} is missing required 'endpoint' field")]
    DescriptorMissingEndpoint { descriptor_id: String },

    #[error("upstream provider failure: {0}")]
    Upstream(String),

    #[error("manifest directory I/O error: {0}")]
    ManifestIo(String),

    #[error("agent is shutting down")]
    ShuttingDown,
}

/// Top-level errors from Dispatcher-facing operations.
#[derive(Debug, Error, Clone)]
pub enum DtsError {
    #[error("FileIds must not be empty")]
    EmptyFileIds,

    #[error("unknown source database: {0}")]
    UnknownSource(String),

    #[error("unknown destination database: {0}")]
    UnknownDestination(String),

    #[error(transparent)]
    Destination(#[from] DestinationParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("service is already running")]
    AlreadyRunning,

    #[error("service is not running")]
    NotRunning,

    #[error("directory validation failed: {0}")]
    DirectoryValidation(String),

    #[error("service endpoint '{0}' does not resolve")]
    UnknownServiceEndpoint(String),

    #[error("failed to load persisted state: {0}")]
    PersistenceLoad(String),

    #[error("failed to save state: {0}")]
    PersistenceSave(String),
}

impl DtsError {
    /// Stable error code for feed/journal messages, grounded on the
    /// teacher's `TransferError::code()`.
    pub fn code(&self) -> &'static str {
        match self {
            DtsError::EmptyFileIds => "EMPTY_FILE_IDS",
            DtsError::UnknownSource(_) => "UNKNOWN_SOURCE",
            DtsError::UnknownDestination(_) => "UNKNOWN_DESTINATION",
            DtsError::Destination(_) => "MALFORMED_DESTINATION",
            DtsError::Store(_) => "STORE_ERROR",
            DtsError::Agent(_) => "AGENT_ERROR",
            DtsError::AlreadyRunning => "ALREADY_RUNNING",
            DtsError::NotRunning => "NOT_RUNNING",
            DtsError::DirectoryValidation(_) => "DIRECTORY_VALIDATION",
            DtsError::UnknownServiceEndpoint(_) => "UNKNOWN_SERVICE_ENDPOINT",
            DtsError::PersistenceLoad(_) => "PERSISTENCE_LOAD",
            DtsError::PersistenceSave(_) => "PERSISTENCE_SAVE",
        }
    }
}
