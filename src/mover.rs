//! The Mover agent (spec.md §4.4): drives provider-level byte transfers,
//! one `MoveOperation` per distinct source endpoint in a logical transfer,
//! and hands off to Manifestor once every move has succeeded. Structured
//! like `stager.rs`'s mailbox + clock-subscriber task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::ClockHandle;
use crate::endpoints::{DriverError, EndpointDriver, FileTransferRequest};
use crate::error::AgentError;
use crate::model::{destination_folder, FileDescriptor, MoveOperation, StatusCode, TransferStatus};
use crate::store::StoreHandle;

/// Emitted once every move of a transfer has succeeded, so whoever owns
/// the Manifestor handle can hand off (spec.md §4.4 "Finalizing").
#[derive(Debug, Clone)]
pub struct ReadyToFinalize {
    pub transfer_id: Uuid,
}

type Reply<T> = oneshot::Sender<Result<T, AgentError>>;

enum Command {
    MoveFiles {
        transfer_id: Uuid,
        endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
        destination_root: String,
        destination_endpoint: String,
        reply: Reply<()>,
    },
    Cancel {
        transfer_id: Uuid,
        reply: Reply<()>,
    },
    Pulse,
    Snapshot {
        reply: oneshot::Sender<HashMap<Uuid, Vec<MoveOperation>>>,
    },
}

const MAILBOX_CAPACITY: usize = 32;

/// A rendezvous-style stop signal (spec.md §5 "unbuffered for 'stop'
/// signals"), kept separate from the buffered command mailbox.
type StopSender = StdMutex<Option<oneshot::Sender<()>>>;

#[derive(Clone)]
pub struct MoverHandle {
    commands: mpsc::Sender<Command>,
    stop: Arc<StopSender>,
}

struct MoverTask {
    commands: mpsc::Receiver<Command>,
    stop: oneshot::Receiver<()>,
    store: StoreHandle,
    drivers: HashMap<String, Arc<dyn EndpointDriver>>,
    finalize: mpsc::Sender<ReadyToFinalize>,
    moves: HashMap<Uuid, Vec<MoveOperation>>,
}

impl MoverHandle {
    /// `drivers` is keyed by endpoint name: every source/destination
    /// endpoint name this Mover may encounter must have an entry.
    pub fn start(
        store: StoreHandle,
        drivers: HashMap<String, Arc<dyn EndpointDriver>>,
        clock: ClockHandle,
        finalize: mpsc::Sender<ReadyToFinalize>,
    ) -> Self {
        Self::start_with_moves(store, drivers, clock, finalize, HashMap::new())
    }

    /// Resumes from a `dts.bin` snapshot; existing `provider_task_id`s are
    /// polled again on the next pulse, no new `Transfer` call is issued
    /// (spec.md §5 "Durability").
    pub fn start_with_moves(
        store: StoreHandle,
        drivers: HashMap<String, Arc<dyn EndpointDriver>>,
        clock: ClockHandle,
        finalize: mpsc::Sender<ReadyToFinalize>,
        moves: HashMap<Uuid, Vec<MoveOperation>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = MoverTask {
            commands: rx,
            stop: stop_rx,
            store,
            drivers,
            finalize,
            moves,
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
        MoverHandle {
            commands: tx,
            stop: Arc::new(StdMutex::new(Some(stop_tx))),
        }
    }

    pub async fn move_files(
        &self,
        transfer_id: Uuid,
        endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
        destination_root: String,
        destination_endpoint: String,
    ) -> Result<(), AgentError> {
        self.call(|reply| Command::MoveFiles {
            transfer_id,
            endpoint_groups,
            destination_root,
            destination_endpoint,
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

    pub async fn snapshot(&self) -> HashMap<Uuid, Vec<MoveOperation>> {
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

impl MoverTask {
    async fn run(mut self) {
        loop {
            let cmd = tokio::select! {
                _ = &mut self.stop => {
                    debug!("mover agent stopping");
                    return;
                }
                cmd = self.commands.recv() => cmd,
            };
            let Some(cmd) = cmd else {
                debug!("mover agent stopping");
                return;
            };
            match cmd {
                Command::MoveFiles {
                    transfer_id,
                    endpoint_groups,
                    destination_root,
                    destination_endpoint,
                    reply,
                } => {
                    let result = self
                        .start_moves(
                            transfer_id,
                            endpoint_groups,
                            &destination_root,
                            &destination_endpoint,
                        )
                        .await;
                    let _ = reply.send(result);
                }
                Command::Cancel { transfer_id, reply } => {
                    let result = self.cancel_one(transfer_id).await;
                    let _ = reply.send(result);
                }
                Command::Pulse => self.poll_all().await,
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.moves.clone());
                }
            }
        }
    }

    /// spec.md §4.4 steps 1-4.
    async fn start_moves(
        &mut self,
        transfer_id: Uuid,
        endpoint_groups: HashMap<String, Vec<FileDescriptor>>,
        destination_root: &str,
        destination_endpoint: &str,
    ) -> Result<(), AgentError> {
        let dest_folder = destination_folder(destination_root, transfer_id);
        let mut operations = Vec::with_capacity(endpoint_groups.len());

        for (source_endpoint, descriptors) in endpoint_groups {
            let driver = self.drivers.get(&source_endpoint).cloned().ok_or_else(|| {
                AgentError::Upstream(format!("unknown source endpoint: {source_endpoint}"))
            })?;
            let files: Vec<FileTransferRequest> = descriptors
                .iter()
                .map(|d| FileTransferRequest {
                    source_path: d.path.clone(),
                    destination_path: format!("{dest_folder}/{}", d.path),
                    hash: d.hash.clone(),
                })
                .collect();
            let provider_task_id = driver
                .transfer(&source_endpoint, destination_endpoint, &files)
                .await
                .map_err(|DriverError(msg)| AgentError::Upstream(msg))?;
            operations.push(MoveOperation {
                provider_task_id,
                source_endpoint_name: source_endpoint,
                destination_endpoint_name: destination_endpoint.to_string(),
                completed: false,
            });
        }

        self.moves.insert(transfer_id, operations);
        let status = TransferStatus {
            code: StatusCode::Active,
            message: "moving files".to_string(),
            num_files: 0,
            num_files_transferred: 0,
            num_files_skipped: 0,
        };
        self.store.set_status(transfer_id, status).await?;
        Ok(())
    }

    async fn cancel_one(&mut self, transfer_id: Uuid) -> Result<(), AgentError> {
        let operations = match self.moves.get(&transfer_id) {
            Some(ops) => ops.clone(),
            None => return Ok(()),
        };
        let mut first_error = None;
        for op in &operations {
            if let Some(driver) = self.drivers.get(&op.source_endpoint_name) {
                if let Err(e) = driver.cancel(&op.provider_task_id).await {
                    warn!(transfer_id = %transfer_id, error = %e, "cancel failed for a move");
                    first_error.get_or_insert(AgentError::Upstream(e.0));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn poll_all(&mut self) {
        let ids: Vec<Uuid> = self.moves.keys().copied().collect();
        for transfer_id in ids {
            if let Err(e) = self.poll_one(transfer_id).await {
                warn!(transfer_id = %transfer_id, error = %e, "mover poll failed");
            }
        }
    }

    /// Aggregates `NumFiles`/`NumFilesTransferred`/`NumFilesSkipped` across
    /// every move of a transfer, recomputed from scratch each tick (spec.md
    /// §4.4: "to avoid double counting"). Per the §4.4 tie-break, a move
    /// failing does not immediately fail the transfer while siblings are
    /// still running: the overall outcome is only decided once every move
    /// has reached a terminal state.
    async fn poll_one(&mut self, transfer_id: Uuid) -> Result<(), AgentError> {
        let mut operations = match self.moves.get(&transfer_id) {
            Some(ops) => ops.clone(),
            None => return Ok(()),
        };

        let mut num_files = 0u32;
        let mut num_transferred = 0u32;
        let mut num_skipped = 0u32;
        let mut any_failed = None;
        let mut all_terminal = true;

        for op in &mut operations {
            let driver = self
                .drivers
                .get(&op.source_endpoint_name)
                .ok_or_else(|| {
                    AgentError::Upstream(format!(
                        "unknown source endpoint: {}",
                        op.source_endpoint_name
                    ))
                })?
                .clone();
            let status = driver
                .status(&op.provider_task_id)
                .await
                .map_err(|e| AgentError::Upstream(e.0))?;

            num_files += status.num_files;
            num_transferred += status.num_files_transferred;
            num_skipped += status.num_files_skipped;

            match status.code {
                StatusCode::Succeeded => op.completed = true,
                StatusCode::Failed => {
                    op.completed = true;
                    any_failed.get_or_insert(status.message);
                }
                _ => all_terminal = false,
            }
        }

        if !all_terminal {
            self.moves.insert(transfer_id, operations);
            let status = TransferStatus {
                code: StatusCode::Active,
                message: "moving files".to_string(),
                num_files,
                num_files_transferred: num_transferred,
                num_files_skipped: num_skipped,
            };
            let _ = self.store.set_status(transfer_id, status).await;
            return Ok(());
        }

        if let Some(message) = any_failed {
            self.moves.remove(&transfer_id);
            let failed = TransferStatus {
                code: StatusCode::Failed,
                message,
                num_files,
                num_files_transferred: num_transferred,
                num_files_skipped: num_skipped,
            };
            self.store.set_status(transfer_id, failed).await?;
        } else {
            self.moves.remove(&transfer_id);
            let status = TransferStatus {
                code: StatusCode::Finalizing,
                message: "all moves complete, generating manifest".to_string(),
                num_files,
                num_files_transferred: num_transferred,
                num_files_skipped: num_skipped,
            };
            self.store.set_status(transfer_id, status).await?;
            let _ = self.finalize.send(ReadyToFinalize { transfer_id }).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockHandle;
    use crate::endpoints::ProviderStatus;
    use crate::testing::MockEndpointDriver;
    use std::time::Duration;

    fn descriptor(id: &str, endpoint: &str, path: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            path: path.to_string(),
            format: "text/plain".to_string(),
            mediatype: None,
            bytes: 10,
            hash: "abc".to_string(),
            endpoint: Some(endpoint.to_string()),
            credit: None,
            sources: None,
            extra: serde_json::Map::new(),
        }
    }

    async fn new_store_with_transfer() -> (StoreHandle, Uuid) {
        use crate::model::{Destination, TransferSpec, User};
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let spec = TransferSpec {
            source: "jdp".to_string(),
            destination: Destination::Database("kbase".to_string()),
            file_ids: vec!["f1".to_string()],
            user: User {
                name: "Alice".to_string(),
                email: "a@example.com".to_string(),
                orcid: "0000".to_string(),
                organization: None,
            },
            description: "test".to_string(),
            instructions: serde_json::Map::new(),
            time_of_request: chrono::Utc::now(),
        };
        let id = store.new_transfer(spec, vec![]).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn partitions_by_endpoint_and_issues_one_transfer_per_group() {
        let (store, transfer_id) = new_store_with_transfer().await;
        let clock = ClockHandle::start(Duration::from_millis(500));
        let (finalize_tx, _finalize_rx) = mpsc::channel(4);

        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("endpointA".to_string(), driver.clone());
        drivers.insert("endpointB".to_string(), driver.clone());

        let mover = MoverHandle::start(store, drivers, clock, finalize_tx);

        let mut groups = HashMap::new();
        groups.insert(
            "endpointA".to_string(),
            vec![
                descriptor("f1", "endpointA", "a/f1"),
                descriptor("f2", "endpointA", "a/f2"),
            ],
        );
        groups.insert("endpointB".to_string(), vec![descriptor("f3", "endpointB", "b/f3")]);

        mover
            .move_files(
                transfer_id,
                groups,
                "alice".to_string(),
                "dest-endpoint".to_string(),
            )
            .await
            .unwrap();

        let calls = driver.transfer_calls();
        assert_eq!(calls.len(), 2);
        let mut sizes: Vec<usize> = calls.iter().map(|(_, _, n)| *n).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2]);
    }

    #[tokio::test]
    async fn all_moves_succeeding_sets_finalizing_and_notifies() {
        let (store, transfer_id) = new_store_with_transfer().await;
        let clock = ClockHandle::start(Duration::from_millis(15));
        let (finalize_tx, mut finalize_rx) = mpsc::channel(4);

        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("endpointA".to_string(), driver.clone());

        let mover = MoverHandle::start(store.clone(), drivers, clock, finalize_tx);
        let mut groups = HashMap::new();
        groups.insert("endpointA".to_string(), vec![descriptor("f1", "endpointA", "a/f1")]);
        mover
            .move_files(transfer_id, groups, "alice".to_string(), "dest".to_string())
            .await
            .unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(2), finalize_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(ready.transfer_id, transfer_id);

        let status = store.get_status(transfer_id).await.unwrap();
        assert_eq!(status.code, StatusCode::Finalizing);
    }

    #[tokio::test]
    async fn any_move_failing_sets_failed() {
        let (store, transfer_id) = new_store_with_transfer().await;
        let clock = ClockHandle::start(Duration::from_millis(15));
        let (finalize_tx, _finalize_rx) = mpsc::channel(4);

        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("endpointA".to_string(), driver.clone());

        let mover = MoverHandle::start(store.clone(), drivers.clone(), clock, finalize_tx);
        let mut groups = HashMap::new();
        groups.insert("endpointA".to_string(), vec![descriptor("f1", "endpointA", "a/f1")]);
        mover
            .move_files(transfer_id, groups, "alice".to_string(), "dest".to_string())
            .await
            .unwrap();

        // Force the task into Failed on the next poll.
        let calls = driver.transfer_calls();
        assert_eq!(calls.len(), 1);
        driver.set_status(
            "task-1",
            ProviderStatus {
                code: StatusCode::Failed,
                num_files: 1,
                num_files_transferred: 0,
                num_files_skipped: 0,
                message: "provider says no".to_string(),
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = store.get_status(transfer_id).await.unwrap();
        assert_eq!(status.code, StatusCode::Failed);
        assert_eq!(status.message, "provider says no");
    }

    #[tokio::test]
    async fn cancel_invokes_every_moves_driver() {
        let (store, transfer_id) = new_store_with_transfer().await;
        let clock = ClockHandle::start(Duration::from_millis(500));
        let (finalize_tx, _finalize_rx) = mpsc::channel(4);

        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("endpointA".to_string(), driver.clone());
        drivers.insert("endpointB".to_string(), driver.clone());

        let mover = MoverHandle::start(store, drivers, clock, finalize_tx);
        let mut groups = HashMap::new();
        groups.insert("endpointA".to_string(), vec![descriptor("f1", "endpointA", "a/f1")]);
        groups.insert("endpointB".to_string(), vec![descriptor("f2", "endpointB", "b/f2")]);
        mover
            .move_files(transfer_id, groups, "alice".to_string(), "dest".to_string())
            .await
            .unwrap();

        mover.cancel(transfer_id).await.unwrap();
        assert_eq!(driver.cancel_calls().len(), 2);
    }
}
