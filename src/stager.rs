//! The Stager agent (spec.md §4.3): tracks transfers the source database is
//! still materializing and polls `DatabaseAdapter::staging_status` on every
//! Clock pulse until the provider reports success or failure. Structured
//! exactly like `store.rs`'s mailbox, generalized from the teacher's
//! `RecoveryWorker::run()` poll loop (`loop { scan_and_recover().await;
//! sleep(interval).await }`) driven here by Clock pulses instead of a bare
//! sleep, so the interval is centrally configurable (spec.md §4.1).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::adapters::DatabaseAdapter;
use crate::clock::ClockHandle;
use crate::error::AgentError;
use crate::model::{FileDescriptor, StagingEntry, StatusCode, TransferStatus};
use crate::store::StoreHandle;

/// Emitted once a staged transfer is ready to move, so the Dispatcher (or
/// whoever owns the Mover handle) can hand it off (spec.md §4.2
/// "FilesStaged" transition).
#[derive(Debug, Clone)]
pub struct ReadyToMove {
    pub transfer_id: Uuid,
    pub endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
}

type Reply<T> = oneshot::Sender<Result<T, AgentError>>;

enum Command {
    StageFiles {
        transfer_id: Uuid,
        source: String,
        staging_id: String,
        endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
        reply: Reply<()>,
    },
    Cancel {
        transfer_id: Uuid,
        reply: Reply<()>,
    },
    Pulse,
    Snapshot {
        reply: oneshot::Sender<HashMap<Uuid, Entry>>,
    },
}

const MAILBOX_CAPACITY: usize = 32;

/// A rendezvous-style stop signal (spec.md §5 "unbuffered for 'stop'
/// signals"), kept separate from the buffered command mailbox.
type StopSender = StdMutex<Option<oneshot::Sender<()>>>;

#[derive(Clone)]
pub struct StagerHandle {
    commands: mpsc::Sender<Command>,
    stop: Arc<StopSender>,
}

/// Also the shape persisted into `dts.bin` by `persistence.rs`.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Entry {
    pub source: String,
    pub staging_id: String,
    pub endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
}

struct StagerTask {
    commands: mpsc::Receiver<Command>,
    stop: oneshot::Receiver<()>,
    store: StoreHandle,
    adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
    ready: mpsc::Sender<ReadyToMove>,
    entries: HashMap<Uuid, Entry>,
}

impl StagerHandle {
    pub fn start(
        store: StoreHandle,
        adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
        clock: ClockHandle,
        ready: mpsc::Sender<ReadyToMove>,
    ) -> Self {
        Self::start_with_entries(store, adapters, clock, ready, HashMap::new())
    }

    /// Resumes from a `dts.bin` snapshot. Entries are polled again on the
    /// next pulse using their existing `staging_id` — spec.md §5
    /// "Durability": "no local re-staging ... is initiated".
    pub fn start_with_entries(
        store: StoreHandle,
        adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
        clock: ClockHandle,
        ready: mpsc::Sender<ReadyToMove>,
        entries: HashMap<Uuid, Entry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = StagerTask {
            commands: rx,
            stop: stop_rx,
            store,
            adapters,
            ready,
            entries,
        };
        let pulse_tx = tx.clone();
        tokio::spawn(async move {
            let (_id, mut pulses) = clock.subscribe().await;
            while pulses.recv().await.is_some() {
                if pulse_tx.send(Command::Pulse).await.is_err() {
                    break;
                }
            }
        });
        tokio::spawn(task.run());
        StagerHandle {
            commands: tx,
            stop: Arc::new(StdMutex::new(Some(stop_tx))),
        }
    }

    pub async fn stage_files(
        &self,
        transfer_id: Uuid,
        source: String,
        staging_id: String,
        endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
    ) -> Result<(), AgentError> {
        self.call(|reply| Command::StageFiles {
            transfer_id,
            source,
            staging_id,
            endpoint_groups,
            reply,
        })
        .await
    }

    pub async fn cancel(&self, transfer_id: Uuid) -> Result<(), AgentError> {
        self.call(|reply| Command::Cancel { transfer_id, reply })
            .await
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    pub async fn snapshot(&self) -> HashMap<Uuid, Entry> {
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

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| AgentError::ShuttingDown)?;
        reply_rx.await.map_err(|_| AgentError::ShuttingDown)?
    }
}

impl StagerTask {
    async fn run(mut self) {
        loop {
            let cmd = tokio::select! {
                _ = &mut self.stop => {
                    debug!("stager agent stopping");
                    return;
                }
                cmd = self.commands.recv() => cmd,
            };
            let Some(cmd) = cmd else {
                debug!("stager agent stopping");
                return;
            };
            match cmd {
                Command::StageFiles {
                    transfer_id,
                    source,
                    staging_id,
                    endpoint_groups,
                    reply,
                } => {
                    self.entries.insert(
                        transfer_id,
                        Entry {
                            source,
                            staging_id,
                            endpoint_groups,
                        },
                    );
                    let status = TransferStatus {
                        code: StatusCode::Staging,
                        message: "staging files at source".to_string(),
                        num_files: 0,
                        num_files_transferred: 0,
                        num_files_skipped: 0,
                    };
                    if let Err(e) = self.store.set_status(transfer_id, status).await {
                        let _ = reply.send(Err(AgentError::Store(e)));
                        continue;
                    }
                    let _ = reply.send(Ok(()));
                }
                Command::Cancel { transfer_id, reply } => {
                    self.entries.remove(&transfer_id);
                    let _ = reply.send(Ok(()));
                }
                Command::Pulse => self.poll_all().await,
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.entries.clone());
                }
            }
        }
    }

    async fn poll_all(&mut self) {
        let ids: Vec<Uuid> = self.entries.keys().copied().collect();
        for transfer_id in ids {
            if let Err(e) = self.poll_one(transfer_id).await {
                warn!(transfer_id = %transfer_id, error = %e, "stager poll failed");
            }
        }
    }

    async fn poll_one(&mut self, transfer_id: Uuid) -> Result<(), AgentError> {
        let entry = match self.entries.get(&transfer_id) {
            Some(e) => e,
            None => return Ok(()),
        };
        let adapter = self
            .adapters
            .get(&entry.source)
            .ok_or_else(|| AgentError::Upstream(format!("unknown source database: {}", entry.source)))?
            .clone();
        let staging_id = entry.staging_id.clone();

        let status = adapter
            .staging_status(&staging_id)
            .await
            .map_err(|e| AgentError::Upstream(e.0))?;

        if status.succeeded {
            let entry = self.entries.remove(&transfer_id).expect("checked above");
            let _ = self
                .ready
                .send(ReadyToMove {
                    transfer_id,
                    endpoint_groups: entry.endpoint_groups,
                })
                .await;
        } else if status.failed {
            self.entries.remove(&transfer_id);
            let failed = TransferStatus {
                code: StatusCode::Failed,
                message: status.message,
                num_files: 0,
                num_files_transferred: 0,
                num_files_skipped: 0,
            };
            self.store.set_status(transfer_id, failed).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDatabaseAdapter;
    use std::time::Duration;

    #[tokio::test]
    async fn successful_staging_emits_ready_to_move() {
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let clock = ClockHandle::start(Duration::from_millis(15));
        let (ready_tx, mut ready_rx) = mpsc::channel(4);

        let mock = Arc::new(MockDatabaseAdapter::new());
        mock.set_staging_outcome("stg-1", true, false);
        let mut adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        adapters.insert("jdp".to_string(), mock.clone());

        let stager = StagerHandle::start(store, adapters, clock, ready_tx);
        let transfer_id = Uuid::new_v4();
        stager
            .stage_files(
                transfer_id,
                "jdp".to_string(),
                "stg-1".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(2), ready_rx.recv())
            .await
            .expect("timed out waiting for ready-to-move")
            .expect("channel closed");
        assert_eq!(ready.transfer_id, transfer_id);
    }

    #[tokio::test]
    async fn failed_staging_sets_failed_status() {
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let clock = ClockHandle::start(Duration::from_millis(15));
        let (ready_tx, _ready_rx) = mpsc::channel(4);

        let mock = Arc::new(MockDatabaseAdapter::new());
        mock.set_staging_outcome("stg-2", false, true);
        let mut adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        adapters.insert("jdp".to_string(), mock.clone());

        let transfer_id = Uuid::new_v4();
        let store_for_assert = store.clone();
        let stager = StagerHandle::start(store, adapters, clock, ready_tx);
        stager
            .stage_files(
                transfer_id,
                "jdp".to_string(),
                "stg-2".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = store_for_assert.get_status(transfer_id).await.unwrap();
        assert_eq!(status.code, StatusCode::Failed);
    }

    #[tokio::test]
    async fn cancel_drops_the_entry() {
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let clock = ClockHandle::start(Duration::from_millis(500));
        let (ready_tx, _ready_rx) = mpsc::channel(4);
        let mock = Arc::new(MockDatabaseAdapter::new());
        let mut adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        adapters.insert("jdp".to_string(), mock.clone());

        let stager = StagerHandle::start(store, adapters, clock, ready_tx);
        let transfer_id = Uuid::new_v4();
        stager
            .stage_files(
                transfer_id,
                "jdp".to_string(),
                "stg-3".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap();
        stager.cancel(transfer_id).await.unwrap();
    }
}
