//! The pub/sub status broker (spec.md §4.7).
//!
//! Unlike the Clock, slow-subscriber lag here is acceptable (a missed status
//! update is not actionable the way a missed poll pulse would be), so this
//! is built on `tokio::sync::broadcast` rather than the Clock's per-subscriber
//! mailbox (SPEC_FULL.md §1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{StatusCode, TransferStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub description: String,
    pub transfer_id: Uuid,
    pub status: TransferStatus,
    pub time: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("status code {0} is out of range for a feed message")]
    InvalidStatusCode(StatusCode),
}

const DEFAULT_CAPACITY: usize = 256;

/// Handle to the broker. Cloning is cheap and shares the underlying
/// broadcast channel; every clone can publish and every clone can
/// subscribe independently.
#[derive(Clone)]
pub struct Feed {
    sender: broadcast::Sender<Message>,
}

impl Feed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Feed { sender }
    }

    /// Registers a subscriber. The returned id is only useful for log
    /// correlation; unsubscribing happens implicitly by dropping the
    /// receiver.
    pub fn subscribe(&self) -> (Uuid, broadcast::Receiver<Message>) {
        (Uuid::new_v4(), self.sender.subscribe())
    }

    /// Publishes a status update to all current subscribers. Never blocks:
    /// a lagging subscriber just drops the oldest buffered messages
    /// (`broadcast::error::RecvError::Lagged` on their next `recv`).
    pub fn publish(&self, message: Message) -> Result<(), FeedError> {
        if matches!(message.status.code, StatusCode::Unknown) {
            return Err(FeedError::InvalidStatusCode(message.status.code));
        }
        // No subscribers is not an error: the broker doesn't know or care
        // whether anyone is listening.
        let _ = self.sender.send(message);
        Ok(())
    }
}

impl Default for Feed {
    fn default() -> Self {
        Self::new()
    }
}
