//! The Manifestor agent (spec.md §4.5): builds the Frictionless-style JSON
//! manifest, deposits it at the destination as `manifest.json`, and
//! finalizes the transfer. Structured like `mover.rs`'s mailbox +
//! clock-subscriber task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::DatabaseAdapter;
use crate::clock::ClockHandle;
use crate::endpoints::{EndpointDriver, FileTransferRequest};
use crate::error::AgentError;
use crate::journal::{Journal, JournalRecord};
use crate::model::{
    destination_folder, Destination, FileDescriptor, ManifestEntry, StatusCode, TransferSpec,
    TransferStatus, MANIFEST_FILENAME,
};
use crate::store::StoreHandle;

type Reply<T> = oneshot::Sender<Result<T, AgentError>>;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Generate {
        transfer_id: Uuid,
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
        reply: oneshot::Sender<HashMap<Uuid, ManifestEntry>>,
    },
}

const MAILBOX_CAPACITY: usize = 32;

/// A rendezvous-style stop signal (spec.md §5 "unbuffered for 'stop'
/// signals"), kept separate from the buffered command mailbox.
type StopSender = StdMutex<Option<oneshot::Sender<()>>>;

#[derive(Clone)]
pub struct ManifestorHandle {
    commands: mpsc::Sender<Command>,
    stop: Arc<StopSender>,
}

struct ManifestorTask {
    commands: mpsc::Receiver<Command>,
    stop: oneshot::Receiver<()>,
    store: StoreHandle,
    service_endpoint_name: String,
    manifest_directory: PathBuf,
    drivers: HashMap<String, Arc<dyn EndpointDriver>>,
    database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
    journal: Arc<dyn Journal>,
    entries: HashMap<Uuid, ManifestEntry>,
}

#[derive(Serialize)]
struct Contributor {
    id: Uuid,
    title: String,
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

impl ManifestorHandle {
    /// `service_endpoint_name` names the local, filesystem-capable endpoint
    /// used as the manifest's transfer source (spec.md §4.5 step 3).
    /// `manifest_directory` is where the manifest file is written before
    /// that transfer is kicked off, and deleted from after the transfer is
    /// observed terminal (spec.md §4.5 step 2, §5 "Durability").
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        store: StoreHandle,
        service_endpoint_name: String,
        manifest_directory: PathBuf,
        drivers: HashMap<String, Arc<dyn EndpointDriver>>,
        database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
        journal: Arc<dyn Journal>,
        clock: ClockHandle,
    ) -> Self {
        Self::start_with_entries(
            store,
            service_endpoint_name,
            manifest_directory,
            drivers,
            database_adapters,
            journal,
            clock,
            HashMap::new(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start_with_entries(
        store: StoreHandle,
        service_endpoint_name: String,
        manifest_directory: PathBuf,
        drivers: HashMap<String, Arc<dyn EndpointDriver>>,
        database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>>,
        journal: Arc<dyn Journal>,
        clock: ClockHandle,
        entries: HashMap<Uuid, ManifestEntry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = ManifestorTask {
            commands: rx,
            stop: stop_rx,
            store,
            service_endpoint_name,
            manifest_directory,
            drivers,
            database_adapters,
            journal,
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
        ManifestorHandle {
            commands: tx,
            stop: Arc::new(StdMutex::new(Some(stop_tx))),
        }
    }

    pub async fn generate(
        &self,
        transfer_id: Uuid,
        destination_root: String,
        destination_endpoint: String,
    ) -> Result<(), AgentError> {
        self.call(|reply| Command::Generate {
            transfer_id,
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

    pub async fn snapshot(&self) -> HashMap<Uuid, ManifestEntry> {
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

impl ManifestorTask {
    async fn run(mut self) {
        loop {
            let cmd = tokio::select! {
                _ = &mut self.stop => {
                    debug!("manifestor agent stopping");
                    return;
                }
                cmd = self.commands.recv() => cmd,
            };
            let Some(cmd) = cmd else {
                debug!("manifestor agent stopping");
                return;
            };
            match cmd {
                Command::Generate {
                    transfer_id,
                    destination_root,
                    destination_endpoint,
                    reply,
                } => {
                    let result = self
                        .generate_one(transfer_id, &destination_root, &destination_endpoint)
                        .await;
                    let _ = reply.send(result);
                }
                Command::Cancel { transfer_id, reply } => {
                    let result = self.cancel_one(transfer_id).await;
                    let _ = reply.send(result);
                }
                Command::Pulse => self.poll_all().await,
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.entries.clone());
                }
            }
        }
    }

    /// spec.md §4.5 steps 1-3.
    async fn generate_one(
        &mut self,
        transfer_id: Uuid,
        destination_root: &str,
        destination_endpoint: &str,
    ) -> Result<(), AgentError> {
        let spec = self.store.get_specification(transfer_id).await?;
        let descriptors = self.store.get_descriptors(transfer_id).await?;

        let username = match &spec.destination {
            Destination::Database(db_name) => {
                let adapter = self.database_adapters.get(db_name).ok_or_else(|| {
                    AgentError::Upstream(format!("unknown destination database: {db_name}"))
                })?;
                Some(
                    adapter
                        .local_user(&spec.user.orcid)
                        .await
                        .map_err(|e| AgentError::Upstream(e.0))?,
                )
            }
            Destination::Custom(_) => None,
        };

        let body = build_manifest_body(transfer_id, &spec, &descriptors, username);
        let filename = format!("manifest-{transfer_id}.json");
        let manifest_path = self.manifest_directory.join(&filename);

        // spec.md §4.5 step 2: "if descriptors is empty, write an empty
        // file" — otherwise the serialized package descriptor.
        let on_disk: &[u8] = if descriptors.is_empty() { &[] } else { &body };
        std::fs::write(&manifest_path, on_disk).map_err(|e| {
            AgentError::ManifestIo(format!("writing {}: {e}", manifest_path.display()))
        })?;

        let driver = self
            .drivers
            .get(destination_endpoint)
            .ok_or_else(|| {
                AgentError::Upstream(format!("unknown destination endpoint: {destination_endpoint}"))
            })?
            .clone();

        let dest_folder = destination_folder(destination_root, transfer_id);
        let files = vec![FileTransferRequest {
            source_path: manifest_path.to_string_lossy().into_owned(),
            destination_path: format!("{dest_folder}/{MANIFEST_FILENAME}"),
            hash: String::new(),
        }];
        let provider_task_id = driver
            .transfer(&self.service_endpoint_name, destination_endpoint, &files)
            .await
            .map_err(|e| AgentError::ManifestIo(e.0))?;

        self.entries.insert(
            transfer_id,
            ManifestEntry {
                manifest_transfer_id: provider_task_id,
                manifest_body: body,
                filename,
                destination_endpoint: destination_endpoint.to_string(),
            },
        );
        Ok(())
    }

    async fn cancel_one(&mut self, transfer_id: Uuid) -> Result<(), AgentError> {
        let entry = match self.entries.get(&transfer_id) {
            Some(e) => e,
            None => return Ok(()),
        };
        if let Some(driver) = self.drivers.get(&entry.destination_endpoint) {
            driver
                .cancel(&entry.manifest_transfer_id)
                .await
                .map_err(|e| AgentError::Upstream(e.0))?;
        }
        Ok(())
    }

    async fn poll_all(&mut self) {
        let ids: Vec<Uuid> = self.entries.keys().copied().collect();
        for transfer_id in ids {
            if let Err(e) = self.poll_one(transfer_id).await {
                warn!(transfer_id = %transfer_id, error = %e, "manifestor poll failed");
            }
        }
    }

    async fn poll_one(&mut self, transfer_id: Uuid) -> Result<(), AgentError> {
        let entry = match self.entries.get(&transfer_id) {
            Some(e) => e,
            None => return Ok(()),
        };
        let driver = self
            .drivers
            .get(&entry.destination_endpoint)
            .ok_or_else(|| {
                AgentError::Upstream(format!(
                    "unknown destination endpoint: {}",
                    entry.destination_endpoint
                ))
            })?
            .clone();

        let status = driver
            .status(&entry.manifest_transfer_id)
            .await
            .map_err(|e| AgentError::Upstream(e.0))?;

        match status.code {
            StatusCode::Succeeded => self.finish(transfer_id, true, "completed successfully").await,
            StatusCode::Failed => self.finish(transfer_id, false, &status.message).await,
            _ => Ok(()),
        }
    }

    /// spec.md §4.5: journal record, feed is published by the caller via
    /// the status write (`store.set_status` fans out through the
    /// Dispatcher-owned feed relay), delete the on-disk manifest file.
    async fn finish(&mut self, transfer_id: Uuid, succeeded: bool, message: &str) -> Result<(), AgentError> {
        let entry = self.entries.remove(&transfer_id);

        // spec.md §5: "the manifest directory is shared between Manifestor
        // (writer/deleter) and the filesystem endpoint driver (reader);
        // Manifestor deletes only after the read has completed (observed
        // via terminal manifest-transfer status)" — which is exactly the
        // terminal status this function is called to handle.
        if let Some(e) = &entry {
            let path = self.manifest_directory.join(&e.filename);
            if let Err(io_err) = std::fs::remove_file(&path) {
                if io_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(transfer_id = %transfer_id, error = %io_err, path = %path.display(), "failed to delete manifest file");
                }
            }
        }

        let payload_size = self.store.get_payload_size(transfer_id).await.unwrap_or(0);
        let spec = self.store.get_specification(transfer_id).await?;

        let status = TransferStatus {
            code: if succeeded {
                StatusCode::Succeeded
            } else {
                StatusCode::Failed
            },
            message: message.to_string(),
            num_files: spec.file_ids.len() as u32,
            num_files_transferred: if succeeded { spec.file_ids.len() as u32 } else { 0 },
            num_files_skipped: 0,
        };
        self.store.set_status(transfer_id, status).await?;

        let destination_name = match &spec.destination {
            Destination::Database(name) => name.clone(),
            Destination::Custom(c) => format!("{}:{}:{}", c.provider, c.endpoint_uuid, c.credential_name),
        };
        let record = JournalRecord {
            id: transfer_id,
            source: spec.source.clone(),
            destination: destination_name,
            orcid: spec.user.orcid.clone(),
            start_time: spec.time_of_request,
            stop_time: Utc::now(),
            status: if succeeded { "succeeded" } else { "failed" }.to_string(),
            payload_size,
            num_files: spec.file_ids.len() as u32,
            manifest: entry
                .map(|e| String::from_utf8_lossy(&e.manifest_body).to_string())
                .unwrap_or_default(),
        };
        if let Err(e) = self.journal.record(record).await {
            warn!(transfer_id = %transfer_id, error = %e, "journal write failed");
        }
        Ok(())
    }
}

/// spec.md §4.5 step 1: the Frictionless Data Package descriptor.
fn build_manifest_body(
    transfer_id: Uuid,
    spec: &TransferSpec,
    descriptors: &[FileDescriptor],
    username: Option<String>,
) -> Vec<u8> {
    let mut contributor = Contributor {
        id: transfer_id,
        title: spec.user.name.clone(),
        role: "author",
        organization: spec.user.organization.clone(),
        email: Some(spec.user.email.clone()),
    };
    if contributor.email.as_deref() == Some("") {
        contributor.email = None;
    }

    let mut manifest = json!({
        "name": "manifest",
        "resources": descriptors,
        "created": Utc::now().to_rfc3339(),
        "profile": "data-package",
        "keywords": ["dts", "manifest"],
        "contributors": [contributor],
        "description": spec.description,
        "instructions": spec.instructions,
    });
    if let Some(username) = username {
        manifest["username"] = json!(username);
    }
    serde_json::to_vec_pretty(&manifest).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::ProviderStatus;
    use crate::model::{Destination, TransferSpec, User};
    use crate::testing::{MockDatabaseAdapter, MockEndpointDriver, MockJournal};
    use std::time::Duration;

    fn spec(destination: Destination) -> TransferSpec {
        TransferSpec {
            source: "jdp".to_string(),
            destination,
            file_ids: vec!["f1".to_string()],
            user: User {
                name: "Alice".to_string(),
                email: "a@example.com".to_string(),
                orcid: "0000".to_string(),
                organization: None,
            },
            description: "test transfer".to_string(),
            instructions: serde_json::Map::new(),
            time_of_request: Utc::now(),
        }
    }

    #[tokio::test]
    async fn generate_writes_manifest_and_reaches_succeeded() {
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let transfer_id = store
            .new_transfer(spec(Destination::Database("kbase".to_string())), vec![])
            .await
            .unwrap();

        let clock = ClockHandle::start(Duration::from_millis(15));
        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("dest-endpoint".to_string(), driver.clone());

        let db_adapter = Arc::new(MockDatabaseAdapter::new());
        db_adapter.set_local_user("alice");
        let mut db_adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        db_adapters.insert("kbase".to_string(), db_adapter);

        let journal = Arc::new(MockJournal::new());
        let manifest_dir = tempfile::tempdir().unwrap();

        let manifestor = ManifestorHandle::start(
            store.clone(),
            "local-service-endpoint".to_string(),
            manifest_dir.path().to_path_buf(),
            drivers,
            db_adapters,
            journal.clone(),
            clock,
        );

        manifestor
            .generate(transfer_id, "alice".to_string(), "dest-endpoint".to_string())
            .await
            .unwrap();

        // Descriptors were empty, so spec.md §4.5 step 2 calls for an empty
        // file on disk while the transfer was in flight.
        let manifest_path = manifest_dir.path().join(format!("manifest-{transfer_id}.json"));
        assert_eq!(std::fs::read(&manifest_path).unwrap(), Vec::<u8>::new());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = store.get_status(transfer_id).await.unwrap();
        assert_eq!(status.code, StatusCode::Succeeded);
        assert_eq!(status.message, "completed successfully");
        assert_eq!(journal.records().len(), 1);
        assert_eq!(journal.records()[0].status, "succeeded");

        // spec.md §5: Manifestor deletes the file once the manifest
        // transfer is observed terminal.
        assert!(!manifest_path.exists());
    }

    #[tokio::test]
    async fn failed_manifest_transfer_sets_failed_and_journals() {
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let transfer_id = store
            .new_transfer(spec(Destination::Database("kbase".to_string())), vec![])
            .await
            .unwrap();

        let clock = ClockHandle::start(Duration::from_millis(15));
        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("dest-endpoint".to_string(), driver.clone());

        let db_adapter = Arc::new(MockDatabaseAdapter::new());
        let mut db_adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        db_adapters.insert("kbase".to_string(), db_adapter);
        let journal = Arc::new(MockJournal::new());
        let manifest_dir = tempfile::tempdir().unwrap();

        let manifestor = ManifestorHandle::start(
            store.clone(),
            "local-service-endpoint".to_string(),
            manifest_dir.path().to_path_buf(),
            drivers,
            db_adapters,
            journal.clone(),
            clock,
        );

        manifestor
            .generate(transfer_id, "alice".to_string(), "dest-endpoint".to_string())
            .await
            .unwrap();

        // Force the manifest transfer to Failed.
        let calls = driver.transfer_calls();
        assert_eq!(calls.len(), 1);
        driver.set_status(
            "task-1",
            ProviderStatus {
                code: StatusCode::Failed,
                num_files: 1,
                num_files_transferred: 0,
                num_files_skipped: 0,
                message: "disk full".to_string(),
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = store.get_status(transfer_id).await.unwrap();
        assert_eq!(status.code, StatusCode::Failed);
        assert_eq!(journal.records()[0].status, "failed");

        let manifest_path = manifest_dir.path().join(format!("manifest-{transfer_id}.json"));
        assert!(!manifest_path.exists());
    }

    #[tokio::test]
    async fn generate_fails_when_manifest_directory_is_unwritable() {
        let store = StoreHandle::start(Duration::from_secs(3600), crate::feed::Feed::new());
        let transfer_id = store
            .new_transfer(spec(Destination::Database("kbase".to_string())), vec![])
            .await
            .unwrap();

        let clock = ClockHandle::start(Duration::from_millis(500));
        let driver = Arc::new(MockEndpointDriver::new());
        let mut drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
        drivers.insert("dest-endpoint".to_string(), driver);

        let db_adapter = Arc::new(MockDatabaseAdapter::new());
        let mut db_adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        db_adapters.insert("kbase".to_string(), db_adapter);
        let journal = Arc::new(MockJournal::new());

        // A manifest "directory" that is actually a file can never have a
        // file written underneath it.
        let parent = tempfile::tempdir().unwrap();
        let not_a_directory = parent.path().join("not-a-directory");
        std::fs::write(&not_a_directory, b"").unwrap();

        let manifestor = ManifestorHandle::start(
            store,
            "local-service-endpoint".to_string(),
            not_a_directory,
            drivers,
            db_adapters,
            journal,
            clock,
        );

        let err = manifestor
            .generate(transfer_id, "alice".to_string(), "dest-endpoint".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ManifestIo(_)));
    }
}
