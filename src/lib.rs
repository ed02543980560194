//! dts-core - Data Transfer Service orchestration library
//!
//! An actor-style orchestrator that moves files between federated databases
//! and external transfer providers (e.g. Globus), built step by step.
//!
//! # Modules
//!
//! - [`model`] - Core data model (TransferSpec, FileDescriptor, status codes)
//! - [`config`] - Service configuration
//! - [`error`] - Error taxonomy
//! - [`destination`] - Custom destination grammar parsing
//! - [`adapters`] - `DatabaseAdapter` collaborator trait
//! - [`endpoints`] - `EndpointDriver` collaborator trait
//! - [`journal`] - `Journal` collaborator trait
//! - [`clock`] - Shared pulse broadcaster driving agent polling
//! - [`feed`] - Status change pub/sub
//! - [`store`] - Transfer record of record
//! - [`stager`] - Staging agent
//! - [`mover`] - Transfer agent
//! - [`manifestor`] - Manifest generation and finalization agent
//! - [`dispatcher`] - Client-facing front door, owns agent lifecycle
//! - [`persistence`] - Durable checkpoint save/load
//! - [`logging`] - Structured logging setup
//! - [`testing`] - In-memory fakes for the collaborator traits

pub mod adapters;
pub mod clock;
pub mod config;
pub mod destination;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod feed;
pub mod journal;
pub mod logging;
pub mod manifestor;
pub mod model;
pub mod mover;
pub mod persistence;
pub mod stager;
pub mod store;
pub mod testing;

// Convenient re-exports at crate root
pub use adapters::{AdapterError, DatabaseAdapter, StagingStatus};
pub use config::{Config, DatabaseConfig, LoggingConfig, ServiceConfig};
pub use destination::{resolve_destination, DestinationParseError};
pub use dispatcher::Dispatcher;
pub use endpoints::{DriverError, EndpointDriver, FileTransferRequest, ProviderStatus};
pub use error::{AgentError, DtsError, StoreError};
pub use journal::{Journal, JournalError, JournalRecord};
pub use model::{
    destination_folder, partition_by_endpoint, CustomDestination, Destination, FileDescriptor,
    ManifestEntry, MoveOperation, StagingEntry, StatusCode, TransferId, TransferRecord,
    TransferSpec, TransferStatus, User, MANIFEST_FILENAME,
};
