//! The Store agent (spec.md §4.2): the single owner of every
//! `TransferRecord`, reachable only through its request/response mailbox.
//! Grounded on the teacher's `transfer::coordinator::TransferCoordinator`,
//! which owns `HashMap<TransferId, TransferState>` behind exactly this kind
//! of `mpsc`-request/`oneshot`-reply mailbox rather than a shared
//! `Mutex<HashMap<..>>` — no lock contention, no risk of a caller observing
//! a half-updated record.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::feed::{Feed, Message as FeedMessage};
use crate::model::{FileDescriptor, TransferRecord, TransferSpec, TransferStatus};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Command {
    NewTransfer {
        spec: TransferSpec,
        descriptors: Vec<FileDescriptor>,
        reply: Reply<Uuid>,
    },
    GetSpecification {
        id: Uuid,
        reply: Reply<TransferSpec>,
    },
    GetDescriptors {
        id: Uuid,
        reply: Reply<Vec<FileDescriptor>>,
    },
    GetStatus {
        id: Uuid,
        reply: Reply<TransferStatus>,
    },
    SetStatus {
        id: Uuid,
        status: TransferStatus,
        reply: Reply<()>,
    },
    GetPayloadSize {
        id: Uuid,
        reply: Reply<u64>,
    },
    Remove {
        id: Uuid,
        reply: Reply<()>,
    },
    /// Snapshot the whole table for `persistence.rs`'s `dts.bin` encoder.
    Snapshot {
        reply: oneshot::Sender<HashMap<Uuid, TransferRecord>>,
    },
}

const MAILBOX_CAPACITY: usize = 64;

/// A rendezvous-style stop signal (spec.md §5 "unbuffered for 'stop'
/// signals"), kept separate from the buffered command mailbox so a pending
/// backlog of real requests can never delay or be delayed by shutdown.
type StopSender = StdMutex<Option<oneshot::Sender<()>>>;

#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::Sender<Command>,
    stop: std::sync::Arc<StopSender>,
}

struct StoreTask {
    commands: mpsc::Receiver<Command>,
    stop: oneshot::Receiver<()>,
    records: HashMap<Uuid, TransferRecord>,
    /// When each record entered a terminal state, used by the retention
    /// sweep (spec.md §4.2 "DeleteAfter"). SPEC_FULL.md §2: applies
    /// uniformly to Succeeded and Failed, not just Succeeded.
    terminal_since: HashMap<Uuid, Instant>,
    delete_after: Duration,
    /// Store is the sole writer of `TransferStatus`, so it is the natural
    /// place to fan every transition out to the feed (spec.md §4.7).
    feed: Feed,
}

impl StoreHandle {
    pub fn start(delete_after: Duration, feed: Feed) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = StoreTask {
            commands: rx,
            stop: stop_rx,
            records: HashMap::new(),
            terminal_since: HashMap::new(),
            delete_after,
            feed,
        };
        tokio::spawn(task.run());
        StoreHandle {
            commands: tx,
            stop: std::sync::Arc::new(StdMutex::new(Some(stop_tx))),
        }
    }

    /// Rehydrates a Store from a persisted snapshot (`persistence.rs`)
    /// instead of starting empty.
    pub fn start_with_records(
        delete_after: Duration,
        feed: Feed,
        records: HashMap<Uuid, TransferRecord>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut terminal_since = HashMap::new();
        let now = Instant::now();
        for (id, record) in &records {
            if record.status.code.is_terminal() {
                terminal_since.insert(*id, now);
            }
        }
        let task = StoreTask {
            commands: rx,
            stop: stop_rx,
            records,
            terminal_since,
            delete_after,
            feed,
        };
        tokio::spawn(task.run());
        StoreHandle {
            commands: tx,
            stop: std::sync::Arc::new(StdMutex::new(Some(stop_tx))),
        }
    }

    pub async fn new_transfer(
        &self,
        spec: TransferSpec,
        descriptors: Vec<FileDescriptor>,
    ) -> Result<Uuid, StoreError> {
        self.call(|reply| Command::NewTransfer {
            spec,
            descriptors,
            reply,
        })
        .await
    }

    pub async fn get_specification(&self, id: Uuid) -> Result<TransferSpec, StoreError> {
        self.call(|reply| Command::GetSpecification { id, reply })
            .await
    }

    pub async fn get_descriptors(&self, id: Uuid) -> Result<Vec<FileDescriptor>, StoreError> {
        self.call(|reply| Command::GetDescriptors { id, reply })
            .await
    }

    pub async fn get_status(&self, id: Uuid) -> Result<TransferStatus, StoreError> {
        self.call(|reply| Command::GetStatus { id, reply }).await
    }

    pub async fn set_status(&self, id: Uuid, status: TransferStatus) -> Result<(), StoreError> {
        self.call(|reply| Command::SetStatus { id, status, reply })
            .await
    }

    pub async fn get_payload_size(&self, id: Uuid) -> Result<u64, StoreError> {
        self.call(|reply| Command::GetPayloadSize { id, reply })
            .await
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.call(|reply| Command::Remove { id, reply }).await
    }

    /// Used by `Dispatcher::stop` to build the `dts.bin` snapshot.
    pub async fn snapshot(&self) -> HashMap<Uuid, TransferRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Snapshot { reply: reply_tx })
            .await
            .is_err()
        {
            return HashMap::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| StoreError::TransferNotFound(Uuid::nil()))?;
        reply_rx
            .await
            .map_err(|_| StoreError::TransferNotFound(Uuid::nil()))?
    }
}

impl StoreTask {
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(Duration::from_secs(60).min(self.delete_after.max(Duration::from_secs(1))));
        loop {
            tokio::select! {
                _ = &mut self.stop => {
                    debug!("store agent stopping");
                    return;
                }
                _ = sweep.tick() => self.sweep_retention(),
                cmd = self.commands.recv() => {
                    match cmd {
                        None => {
                            debug!("store agent stopping");
                            return;
                        }
                        Some(cmd) => self.handle(cmd),
                    }
                }
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::NewTransfer {
                spec,
                descriptors,
                reply,
            } => {
                if spec.file_ids.is_empty() {
                    let _ = reply.send(Err(StoreError::EmptyFileIds));
                    return;
                }
                let id = Uuid::new_v4();
                self.records.insert(
                    id,
                    TransferRecord {
                        spec,
                        descriptors,
                        status: TransferStatus::unknown(),
                    },
                );
                let _ = reply.send(Ok(id));
            }
            Command::GetSpecification { id, reply } => {
                let result = self
                    .records
                    .get(&id)
                    .map(|r| r.spec.clone())
                    .ok_or(StoreError::TransferNotFound(id));
                let _ = reply.send(result);
            }
            Command::GetDescriptors { id, reply } => {
                let result = self
                    .records
                    .get(&id)
                    .map(|r| r.descriptors.clone())
                    .ok_or(StoreError::TransferNotFound(id));
                let _ = reply.send(result);
            }
            Command::GetStatus { id, reply } => {
                let result = self
                    .records
                    .get(&id)
                    .map(|r| r.status.clone())
                    .ok_or(StoreError::TransferNotFound(id));
                let _ = reply.send(result);
            }
            Command::SetStatus { id, status, reply } => {
                let result = match self.records.get_mut(&id) {
                    None => Err(StoreError::TransferNotFound(id)),
                    Some(record) => {
                        if !record.status.allows_transition_to(status.code) {
                            Err(StoreError::TerminalStatusDowngrade(id))
                        } else {
                            let became_terminal = status.code.is_terminal();
                            record.status = status.clone();
                            if became_terminal {
                                self.terminal_since.insert(id, Instant::now());
                            }
                            let _ = self.feed.publish(FeedMessage {
                                description: record.spec.description.clone(),
                                transfer_id: id,
                                status,
                                time: chrono::Utc::now(),
                            });
                            Ok(())
                        }
                    }
                };
                let _ = reply.send(result);
            }
            Command::GetPayloadSize { id, reply } => {
                let result = self
                    .records
                    .get(&id)
                    .map(|r| r.payload_size())
                    .ok_or(StoreError::TransferNotFound(id));
                let _ = reply.send(result);
            }
            Command::Remove { id, reply } => {
                let result = match self.records.remove(&id) {
                    Some(_) => {
                        self.terminal_since.remove(&id);
                        Ok(())
                    }
                    None => Err(StoreError::TransferNotFound(id)),
                };
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.records.clone());
            }
        }
    }

    fn sweep_retention(&mut self) {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .terminal_since
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= self.delete_after)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.records.remove(&id);
            self.terminal_since.remove(&id);
            debug!(transfer_id = %id, "removed transfer record past retention window");
        }
    }
}
