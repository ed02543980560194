//! The durable audit trail Manifestor appends to on every terminal outcome
//! (spec.md §4.5 "Journal record"). A separate collaborator from
//! `persistence.rs`'s `dts.bin` snapshot: the journal is an append-only,
//! externally consumed record, whereas `dts.bin` is restart recovery state
//! private to the agents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRecord {
    pub id: Uuid,
    pub source: String,
    pub destination: String,
    pub orcid: String,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    /// "succeeded" or "failed", matching spec.md §4.5's on-disk vocabulary.
    pub status: String,
    pub payload_size: u64,
    pub num_files: u32,
    pub manifest: String,
}

#[derive(Debug, thiserror::Error, Clone)]
#[error("journal error: {0}")]
pub struct JournalError(pub String);

/// Write side of the audit trail. Implementations in production append to
/// a file or forward to a log-aggregation service; `crate::testing` backs
/// this with an in-memory `Vec` for assertions.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, entry: JournalRecord) -> Result<(), JournalError>;
}
