//! The Dispatcher agent (spec.md §4.6): the client-facing front door. Owns
//! the lifecycle of Clock, Store, Stager, Mover and Manifestor, and wires
//! their hand-off channels together (spec.md §9 "Cyclic call graph": "no
//! code cycle — data flows forward. Each agent holds only a reference (or
//! id) to its immediate downstream and to the Store; wire these at Start.").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::DatabaseAdapter;
use crate::clock::ClockHandle;
use crate::config::Config;
use crate::endpoints::{EndpointDriver, FileTransferRequest};
use crate::error::{AgentError, DtsError};
use crate::feed::{Feed, Message as FeedMessage};
use crate::journal::Journal;
use crate::manifestor::ManifestorHandle;
use crate::model::{partition_by_endpoint, Destination, FileDescriptor, StatusCode, TransferSpec, TransferStatus};
use crate::mover::{MoverHandle, ReadyToFinalize};
use crate::persistence::{self, Snapshot};
use crate::stager::{ReadyToMove, StagerHandle};
use crate::store::StoreHandle;

const HANDOFF_MAILBOX_CAPACITY: usize = 32;

/// Handles wired together at `start` (spec.md §9 "Agent singletons vs.
/// dynamic dispatch"): a value constructed once, not a module-level static.
struct Running {
    store: StoreHandle,
    stager: StagerHandle,
    mover: MoverHandle,
    manifestor: ManifestorHandle,
    clock: ClockHandle,
    feed: Feed,
}

/// The orchestrator's front door. Construct with [`Dispatcher::new`], then
/// [`Dispatcher::start`] before issuing any transfer calls.
pub struct Dispatcher {
    config: Config,
    database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
    endpoint_drivers: HashMap<String, Arc<dyn EndpointDriver>>,
    journal: Arc<dyn Journal>,
    running: RwLock<Option<Running>>,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
        endpoint_drivers: HashMap<String, Arc<dyn EndpointDriver>>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            config,
            database_adapters,
            endpoint_drivers,
            journal,
            running: RwLock::new(None),
        }
    }

    /// spec.md §4.6 `Start(config)`: directory validation, service endpoint
    /// verification, journal init, then Store/Stager/Mover/Manifestor in
    /// that order. Resumes from `<data-dir>/dts.bin` if present.
    pub async fn start(&self) -> Result<(), DtsError> {
        let mut guard = self.running.write().await;
        if guard.is_some() {
            return Err(DtsError::AlreadyRunning);
        }

        validate_directory(&self.config.service.data_directory)?;
        validate_directory(&self.config.service.manifest_directory)?;

        if !self.endpoint_drivers.contains_key(&self.config.service.endpoint) {
            return Err(DtsError::UnknownServiceEndpoint(
                self.config.service.endpoint.clone(),
            ));
        }

        for name in self.endpoint_drivers.keys() {
            debug!(endpoint = %name, "endpoint driver registered");
        }
        for name in self.database_adapters.keys() {
            debug!(database = %name, "database adapter registered");
        }

        let dts_bin = PathBuf::from(&self.config.service.data_directory).join("dts.bin");
        let snapshot = persistence::load(&dts_bin)
            .map_err(|e| DtsError::PersistenceLoad(e.to_string()))?
            .map(persistence::reconcile);

        let feed = Feed::new();
        let clock = ClockHandle::start(self.config.service.poll_interval());

        let store = match &snapshot {
            Some(s) => StoreHandle::start_with_records(
                self.config.service.delete_after(),
                feed.clone(),
                s.store.clone(),
            ),
            None => StoreHandle::start(self.config.service.delete_after(), feed.clone()),
        };

        let (ready_tx, ready_rx) = mpsc::channel(HANDOFF_MAILBOX_CAPACITY);
        let stager = match &snapshot {
            Some(s) => StagerHandle::start_with_entries(
                store.clone(),
                self.database_adapters.clone(),
                clock.clone(),
                ready_tx,
                s.stager.clone(),
            ),
            None => StagerHandle::start(store.clone(), self.database_adapters.clone(), clock.clone(), ready_tx),
        };

        let (finalize_tx, finalize_rx) = mpsc::channel(HANDOFF_MAILBOX_CAPACITY);
        let mover = match &snapshot {
            Some(s) => MoverHandle::start_with_moves(
                store.clone(),
                self.endpoint_drivers.clone(),
                clock.clone(),
                finalize_tx,
                s.mover.clone(),
            ),
            None => MoverHandle::start(store.clone(), self.endpoint_drivers.clone(), clock.clone(), finalize_tx),
        };

        let manifest_directory = PathBuf::from(&self.config.service.manifest_directory);
        let manifestor = match &snapshot {
            Some(s) => ManifestorHandle::start_with_entries(
                store.clone(),
                self.config.service.endpoint.clone(),
                manifest_directory,
                self.endpoint_drivers.clone(),
                self.database_adapters.clone(),
                self.journal.clone(),
                clock.clone(),
                s.manifestor.clone(),
            ),
            None => ManifestorHandle::start(
                store.clone(),
                self.config.service.endpoint.clone(),
                manifest_directory,
                self.endpoint_drivers.clone(),
                self.database_adapters.clone(),
                self.journal.clone(),
                clock.clone(),
            ),
        };

        spawn_ready_to_move_relay(
            ready_rx,
            store.clone(),
            mover.clone(),
            self.database_adapters.clone(),
            self.config.clone(),
        );
        spawn_ready_to_finalize_relay(
            finalize_rx,
            store.clone(),
            manifestor.clone(),
            self.database_adapters.clone(),
            self.config.clone(),
        );

        info!(
            resumed_transfers = snapshot.as_ref().map(|s| s.store.len()).unwrap_or(0),
            "dispatcher started"
        );

        *guard = Some(Running {
            store,
            stager,
            mover,
            manifestor,
            clock,
            feed,
        });
        Ok(())
    }

    /// spec.md §4.6 `Stop()`: save-and-stop in reverse dependency order,
    /// then snapshot to `dts.bin`.
    pub async fn stop(&self) -> Result<(), DtsError> {
        let mut guard = self.running.write().await;
        let running = guard.take().ok_or(DtsError::NotRunning)?;

        let manifestor_entries = running.manifestor.snapshot().await;
        running.manifestor.stop().await;
        let mover_moves = running.mover.snapshot().await;
        running.mover.stop().await;
        let stager_entries = running.stager.snapshot().await;
        running.stager.stop().await;
        let store_records = running.store.snapshot().await;
        running.store.stop().await;

        let snapshot = Snapshot {
            store: store_records,
            stager: stager_entries,
            mover: mover_moves,
            manifestor: manifestor_entries,
        };
        let dts_bin = PathBuf::from(&self.config.service.data_directory).join("dts.bin");
        persistence::save(&dts_bin, &snapshot).map_err(|e| DtsError::PersistenceSave(e.to_string()))?;

        info!("dispatcher stopped");
        Ok(())
    }

    /// spec.md §4.6 `CreateTransfer(spec)`.
    pub async fn create_transfer(&self, spec: TransferSpec) -> Result<Uuid, DtsError> {
        if spec.file_ids.is_empty() {
            return Err(DtsError::EmptyFileIds);
        }

        let source_adapter = self
            .database_adapters
            .get(&spec.source)
            .cloned()
            .ok_or_else(|| DtsError::UnknownSource(spec.source.clone()))?;

        if let Destination::Database(name) = &spec.destination {
            if !self.config.databases.contains_key(name) || !self.database_adapters.contains_key(name) {
                return Err(DtsError::UnknownDestination(name.clone()));
            }
        }

        let guard = self.running.read().await;
        let running = guard.as_ref().ok_or(DtsError::NotRunning)?;

        let descriptors = source_adapter
            .descriptors(&spec.user.orcid, &spec.file_ids)
            .await
            .map_err(|e| AgentError::Upstream(e.0))?;

        let endpoint_names = source_adapter
            .endpoint_names()
            .await
            .map_err(|e| AgentError::Upstream(e.0))?;
        let single_endpoint = match endpoint_names.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };
        let groups = partition_by_endpoint(&descriptors, single_endpoint)
            .map_err(AgentError::Upstream)?;

        let id = running.store.new_transfer(spec.clone(), descriptors).await?;

        let all_staged = self.check_files_staged(&groups).await?;

        if all_staged {
            self.kick_off_move(running, id, &spec, groups).await?;
        } else {
            let staging_id = source_adapter
                .stage_files(&spec.user.orcid, &spec.file_ids)
                .await
                .map_err(|e| AgentError::Upstream(e.0))?;
            running
                .stager
                .stage_files(id, spec.source.clone(), staging_id, groups)
                .await?;
        }

        Ok(id)
    }

    pub async fn get_transfer_status(&self, id: Uuid) -> Result<TransferStatus, DtsError> {
        let guard = self.running.read().await;
        let running = guard.as_ref().ok_or(DtsError::NotRunning)?;
        Ok(running.store.get_status(id).await?)
    }

    /// spec.md §4.6 "Cancellation routes on current status": Staging→Stager,
    /// Active/Inactive→Mover, Finalizing→Manifestor, terminal→no-op.
    pub async fn cancel_transfer(&self, id: Uuid) -> Result<(), DtsError> {
        let guard = self.running.read().await;
        let running = guard.as_ref().ok_or(DtsError::NotRunning)?;
        let status = running.store.get_status(id).await?;
        match status.code {
            StatusCode::Staging => running.stager.cancel(id).await.map_err(DtsError::from),
            StatusCode::Active | StatusCode::Inactive => running.mover.cancel(id).await.map_err(DtsError::from),
            StatusCode::Finalizing => running.manifestor.cancel(id).await.map_err(DtsError::from),
            StatusCode::Unknown | StatusCode::Succeeded | StatusCode::Failed => Ok(()),
        }
    }

    /// Lets an HTTP layer (out of scope per spec.md §1) subscribe to the
    /// status feed. Returns `None` when not running.
    pub async fn subscribe_feed(&self) -> Option<(Uuid, tokio::sync::broadcast::Receiver<FeedMessage>)> {
        let guard = self.running.read().await;
        guard.as_ref().map(|r| r.feed.subscribe())
    }

    async fn check_files_staged(
        &self,
        groups: &HashMap<String, Vec<FileDescriptor>>,
    ) -> Result<bool, DtsError> {
        let checks = join_all(groups.iter().map(|(endpoint_name, files)| {
            let driver = self.endpoint_drivers.get(endpoint_name).cloned();
            let endpoint_name = endpoint_name.clone();
            let requests: Vec<FileTransferRequest> = files
                .iter()
                .map(|d| FileTransferRequest {
                    source_path: d.path.clone(),
                    destination_path: String::new(),
                    hash: d.hash.clone(),
                })
                .collect();
            async move {
                match driver {
                    Some(driver) => driver
                        .files_staged(&endpoint_name, &requests)
                        .await
                        .map_err(|e| AgentError::Upstream(e.0)),
                    None => Err(AgentError::Upstream(format!(
                        "unknown source endpoint: {endpoint_name}"
                    ))),
                }
            }
        }))
        .await;

        let mut all_staged = true;
        for result in checks {
            if !result? {
                all_staged = false;
            }
        }
        Ok(all_staged)
    }

    async fn kick_off_move(
        &self,
        running: &Running,
        id: Uuid,
        spec: &TransferSpec,
        groups: HashMap<String, Vec<FileDescriptor>>,
    ) -> Result<(), DtsError> {
        let (root, endpoint) = resolve_destination(&spec.destination, &spec.user.orcid, &self.database_adapters, &self.config).await?;
        running.mover.move_files(id, groups, root, endpoint).await?;
        Ok(())
    }
}

/// spec.md §3 "Destination folder layout": `<user-or-custom-root>/dts-<uuid>`.
/// For a registered database destination, the root is the destination
/// database's `LocalUser(orcid)` mapping (spec.md §8 property 8); for a
/// custom destination, the root is its optional path segment.
async fn resolve_destination(
    destination: &Destination,
    orcid: &str,
    database_adapters: &HashMap<String, Arc<dyn DatabaseAdapter>>,
    config: &Config,
) -> Result<(String, String), DtsError> {
    match destination {
        Destination::Database(name) => {
            let endpoint = config
                .databases
                .get(name)
                .map(|d| d.endpoint.clone())
                .ok_or_else(|| DtsError::UnknownDestination(name.clone()))?;
            let adapter = database_adapters
                .get(name)
                .ok_or_else(|| DtsError::UnknownDestination(name.clone()))?;
            let root = adapter
                .local_user(orcid)
                .await
                .map_err(|e| AgentError::Upstream(e.0))?;
            Ok((root, endpoint))
        }
        Destination::Custom(custom) => Ok((custom.path.clone().unwrap_or_default(), custom.endpoint_uuid.clone())),
    }
}

fn spawn_ready_to_move_relay(
    mut ready_rx: mpsc::Receiver<ReadyToMove>,
    store: StoreHandle,
    mover: MoverHandle,
    database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
    config: Config,
) {
    tokio::spawn(async move {
        while let Some(ready) = ready_rx.recv().await {
            let spec = match store.get_specification(ready.transfer_id).await {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(transfer_id = %ready.transfer_id, error = %e, "ready-to-move: spec vanished");
                    continue;
                }
            };
            let (root, endpoint) =
                match resolve_destination(&spec.destination, &spec.user.orcid, &database_adapters, &config).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(transfer_id = %ready.transfer_id, error = %e, "ready-to-move: destination resolution failed");
                        continue;
                    }
                };
            if let Err(e) = mover
                .move_files(ready.transfer_id, ready.endpoint_groups, root, endpoint)
                .await
            {
                warn!(transfer_id = %ready.transfer_id, error = %e, "ready-to-move: move_files failed");
            }
        }
    });
}

fn spawn_ready_to_finalize_relay(
    mut finalize_rx: mpsc::Receiver<ReadyToFinalize>,
    store: StoreHandle,
    manifestor: ManifestorHandle,
    database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
    config: Config,
) {
    tokio::spawn(async move {
        while let Some(ready) = finalize_rx.recv().await {
            let spec = match store.get_specification(ready.transfer_id).await {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(transfer_id = %ready.transfer_id, error = %e, "ready-to-finalize: spec vanished");
                    continue;
                }
            };
            // spec.md §4.5 step 3 resolves the same destination folder Mover
            // already wrote the payload under (spec.md §3 "Destination
            // folder layout"), so this re-derives it via the identical
            // `LocalUser`/custom-path rule `resolve_destination` uses for
            // the move step.
            let (root, endpoint) =
                match resolve_destination(&spec.destination, &spec.user.orcid, &database_adapters, &config).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(transfer_id = %ready.transfer_id, error = %e, "ready-to-finalize: destination resolution failed");
                        continue;
                    }
                };
            if let Err(e) = manifestor.generate(ready.transfer_id, root, endpoint).await {
                warn!(transfer_id = %ready.transfer_id, error = %e, "ready-to-finalize: generate failed");
                // spec.md §7 "I/O on manifest directory": returned
                // synchronously from Manifestor; the transfer enters Failed.
                let status = TransferStatus {
                    code: StatusCode::Failed,
                    message: e.to_string(),
                    num_files: spec.file_ids.len() as u32,
                    num_files_transferred: 0,
                    num_files_skipped: 0,
                };
                if let Err(set_err) = store.set_status(ready.transfer_id, status).await {
                    warn!(transfer_id = %ready.transfer_id, error = %set_err, "ready-to-finalize: failed to mark transfer failed");
                }
            }
        }
    });
}

fn validate_directory(path: &str) -> Result<(), DtsError> {
    let p = Path::new(path);
    let metadata = std::fs::metadata(p)
        .map_err(|e| DtsError::DirectoryValidation(format!("{path}: {e}")))?;
    if !metadata.is_dir() {
        return Err(DtsError::DirectoryValidation(format!("{path} is not a directory")));
    }
    let probe = p.join(format!(".dts-probe-{}", Uuid::new_v4()));
    std::fs::write(&probe, b"")
        .map_err(|e| DtsError::DirectoryValidation(format!("{path} is not writable: {e}")))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ServiceConfig};
    use crate::model::{CustomDestination, User};
    use crate::testing::{MockDatabaseAdapter, MockEndpointDriver, MockJournal};
    use serde_json::Map;
    use std::time::Duration;
    use tempfile::tempdir;

    fn spec(source: &str, destination: Destination, file_ids: &[&str]) -> TransferSpec {
        TransferSpec {
            source: source.to_string(),
            destination,
            file_ids: file_ids.iter().map(|s| s.to_string()).collect(),
            user: User {
                name: "Alice".to_string(),
                email: "a@example.com".to_string(),
                orcid: "0000-0000-0000-0001".to_string(),
                organization: None,
            },
            description: "test transfer".to_string(),
            instructions: Map::new(),
            time_of_request: chrono::Utc::now(),
        }
    }

    fn descriptor(id: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            path: format!("dir/{id}"),
            format: "text/plain".to_string(),
            mediatype: None,
            bytes: 10,
            hash: "abc".to_string(),
            endpoint: None,
            credit: None,
            sources: None,
            extra: Map::new(),
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        _data_dir: tempfile::TempDir,
        _manifest_dir: tempfile::TempDir,
        driver: Arc<MockEndpointDriver>,
        source_adapter: Arc<MockDatabaseAdapter>,
    }

    fn harness() -> Harness {
        let data_dir = tempdir().unwrap();
        let manifest_dir = tempdir().unwrap();
        let config = Config {
            service: ServiceConfig {
                poll_interval_ms: 15,
                endpoint: "local-service".to_string(),
                data_directory: data_dir.path().to_string_lossy().to_string(),
                manifest_directory: manifest_dir.path().to_string_lossy().to_string(),
                delete_after_secs: 3600,
            },
            databases: {
                let mut m = HashMap::new();
                m.insert(
                    "test-destination".to_string(),
                    DatabaseConfig {
                        endpoint: "dest-endpoint".to_string(),
                    },
                );
                m
            },
            credentials: HashMap::new(),
            logging: Default::default(),
        };

        let source_adapter = Arc::new(
            MockDatabaseAdapter::new()
                .with_file(descriptor("file1"))
                .with_file(descriptor("file2"))
                .with_file(descriptor("file3")),
        );
        source_adapter.set_endpoint_names(vec!["single-endpoint".to_string()]);
        let dest_adapter = Arc::new(MockDatabaseAdapter::new());
        dest_adapter.set_local_user("alice");

        let mut database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        database_adapters.insert("test-source".to_string(), source_adapter.clone());
        database_adapters.insert("test-destination".to_string(), dest_adapter);

        let driver = Arc::new(MockEndpointDriver::new());
        let mut endpoint_drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        endpoint_drivers.insert("single-endpoint".to_string(), driver.clone());
        endpoint_drivers.insert("dest-endpoint".to_string(), driver.clone());
        endpoint_drivers.insert("local-service".to_string(), driver.clone());

        let journal = Arc::new(MockJournal::new());
        let dispatcher = Dispatcher::new(config, database_adapters, endpoint_drivers, journal);

        Harness {
            dispatcher,
            _data_dir: data_dir,
            _manifest_dir: manifest_dir,
            driver,
            source_adapter,
        }
    }

    #[tokio::test]
    async fn rejects_empty_file_ids_without_creating_a_record() {
        let h = harness();
        h.dispatcher.start().await.unwrap();
        let err = h
            .dispatcher
            .create_transfer(spec(
                "test-source",
                Destination::Database("test-destination".to_string()),
                &[],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DtsError::EmptyFileIds));
    }

    #[tokio::test]
    async fn rejects_unknown_source_database() {
        let h = harness();
        h.dispatcher.start().await.unwrap();
        let err = h
            .dispatcher
            .create_transfer(spec(
                "nonexistent-source",
                Destination::Database("test-destination".to_string()),
                &["file1"],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DtsError::UnknownSource(_)));
    }

    #[tokio::test]
    async fn rejects_unregistered_destination_database() {
        let h = harness();
        h.dispatcher.start().await.unwrap();
        let err = h
            .dispatcher
            .create_transfer(spec(
                "test-source",
                Destination::Database("no-such-db".to_string()),
                &["file1"],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DtsError::UnknownDestination(_)));
    }

    #[tokio::test]
    async fn s1_three_file_happy_path_reaches_succeeded() {
        let h = harness();
        h.driver.set_files_staged(true);
        h.dispatcher.start().await.unwrap();

        let id = h
            .dispatcher
            .create_transfer(spec(
                "test-source",
                Destination::Database("test-destination".to_string()),
                &["file1", "file2", "file3"],
            ))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let status = h.dispatcher.get_transfer_status(id).await.unwrap();
            if status.code == StatusCode::Succeeded || status.code == StatusCode::Failed {
                assert_eq!(status.code, StatusCode::Succeeded);
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("transfer did not reach a terminal state in time: {status:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn s2_unstaged_files_go_through_staging() {
        let h = harness();
        h.driver.set_files_staged(false);
        h.dispatcher.start().await.unwrap();

        let id = h
            .dispatcher
            .create_transfer(spec(
                "test-source",
                Destination::Database("test-destination".to_string()),
                &["file1"],
            ))
            .await
            .unwrap();

        let status = h.dispatcher.get_transfer_status(id).await.unwrap();
        assert_eq!(status.code, StatusCode::Staging);
        assert_eq!(h.source_adapter.stage_files_call_count(), 1);
    }

    #[tokio::test]
    async fn cancel_on_terminal_transfer_is_a_noop() {
        let h = harness();
        h.driver.set_files_staged(true);
        h.dispatcher.start().await.unwrap();
        let id = h
            .dispatcher
            .create_transfer(spec(
                "test-source",
                Destination::Database("test-destination".to_string()),
                &["file1"],
            ))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let status = h.dispatcher.get_transfer_status(id).await.unwrap();
            if status.code.is_terminal() {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("never reached terminal state");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        h.dispatcher.cancel_transfer(id).await.unwrap();
    }

    #[tokio::test]
    async fn custom_destination_parses_and_routes() {
        let h = harness();
        h.driver.set_files_staged(true);
        h.dispatcher.start().await.unwrap();

        let custom = Destination::Custom(CustomDestination {
            provider: "globus".to_string(),
            endpoint_uuid: "dest-endpoint".to_string(),
            credential_name: "my-cred".to_string(),
            path: Some("custom-root".to_string()),
        });
        let id = h
            .dispatcher
            .create_transfer(spec("test-source", custom, &["file1"]))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let status = h.dispatcher.get_transfer_status(id).await.unwrap();
            if status.code.is_terminal() {
                assert_eq!(status.code, StatusCode::Succeeded);
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("never reached terminal state");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
