//! In-memory fakes for the three external collaborator traits
//! (`DatabaseAdapter`, `EndpointDriver`, `Journal`), grounded on the
//! teacher's `transfer::adapters::mock::MockAdapter`: `Mutex`-guarded
//! state, atomic counters for call assertions, and setters that let a test
//! script the exact provider behavior it wants to observe.
//!
//! Not `cfg(test)`-gated (SPEC_FULL.md §0): the `tests/` integration suite
//! needs these from outside the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::adapters::{AdapterError, DatabaseAdapter, StagingStatus};
use crate::endpoints::{DriverError, EndpointDriver, FileTransferRequest, ProviderStatus};
use crate::journal::{Journal, JournalError, JournalRecord};
use crate::model::{FileDescriptor, StatusCode};

/// A scripted `DatabaseAdapter`. Descriptors, staging outcomes, and the
/// local-user mapping are all pre-seeded by the test; call counters let
/// assertions check how many times the core actually invoked the adapter.
pub struct MockDatabaseAdapter {
    descriptors: Mutex<HashMap<String, FileDescriptor>>,
    endpoint_names: Mutex<Vec<String>>,
    staging_outcomes: Mutex<HashMap<String, StagingStatus>>,
    local_user: Mutex<String>,
    next_staging_id: AtomicUsize,
    descriptors_calls: AtomicUsize,
    stage_files_calls: AtomicUsize,
    staging_status_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
}

impl MockDatabaseAdapter {
    pub fn new() -> Self {
        Self {
            descriptors: Mutex::new(HashMap::new()),
            endpoint_names: Mutex::new(Vec::new()),
            staging_outcomes: Mutex::new(HashMap::new()),
            local_user: Mutex::new("localuser".to_string()),
            next_staging_id: AtomicUsize::new(1),
            descriptors_calls: AtomicUsize::new(0),
            stage_files_calls: AtomicUsize::new(0),
            staging_status_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_file(self, descriptor: FileDescriptor) -> Self {
        self.descriptors
            .lock()
            .unwrap()
            .insert(descriptor.id.clone(), descriptor);
        self
    }

    pub fn set_endpoint_names(&self, names: Vec<String>) {
        *self.endpoint_names.lock().unwrap() = names;
    }

    pub fn set_local_user(&self, user: impl Into<String>) {
        *self.local_user.lock().unwrap() = user.into();
    }

    /// Scripts the outcome `StagingStatus::staging_status` returns for a
    /// given staging id. `(succeeded=false, failed=false)` means "still in
    /// progress" and keeps the poller going.
    pub fn set_staging_outcome(&self, staging_id: &str, succeeded: bool, failed: bool) {
        self.staging_outcomes.lock().unwrap().insert(
            staging_id.to_string(),
            StagingStatus {
                succeeded,
                failed,
                message: if failed {
                    "staging failed".to_string()
                } else {
                    String::new()
                },
            },
        );
    }

    pub fn staging_status_call_count(&self) -> usize {
        self.staging_status_calls.load(Ordering::SeqCst)
    }

    pub fn descriptors_call_count(&self) -> usize {
        self.descriptors_calls.load(Ordering::SeqCst)
    }

    pub fn stage_files_call_count(&self) -> usize {
        self.stage_files_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_call_count(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockDatabaseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseAdapter for MockDatabaseAdapter {
    async fn descriptors(
        &self,
        _orcid: &str,
        file_ids: &[String],
    ) -> Result<Vec<FileDescriptor>, AdapterError> {
        self.descriptors_calls.fetch_add(1, Ordering::SeqCst);
        let table = self.descriptors.lock().unwrap();
        file_ids
            .iter()
            .map(|id| {
                table
                    .get(id)
                    .cloned()
                    .ok_or_else(|| AdapterError::new(format!("unknown file id: {id}")))
            })
            .collect()
    }

    async fn search(&self, _query: &str) -> Result<Vec<FileDescriptor>, AdapterError> {
        Ok(self.descriptors.lock().unwrap().values().cloned().collect())
    }

    async fn stage_files(&self, _orcid: &str, _file_ids: &[String]) -> Result<String, AdapterError> {
        self.stage_files_calls.fetch_add(1, Ordering::SeqCst);
        let n = self.next_staging_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("staging-{n}"))
    }

    async fn staging_status(&self, staging_id: &str) -> Result<StagingStatus, AdapterError> {
        self.staging_status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .staging_outcomes
            .lock()
            .unwrap()
            .get(staging_id)
            .cloned()
            .unwrap_or(StagingStatus {
                succeeded: false,
                failed: false,
                message: String::new(),
            }))
    }

    async fn finalize(&self, _transfer_id: Uuid, _manifest: &[u8]) -> Result<(), AdapterError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn local_user(&self, _orcid: &str) -> Result<String, AdapterError> {
        Ok(self.local_user.lock().unwrap().clone())
    }

    async fn endpoint_names(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self.endpoint_names.lock().unwrap().clone())
    }
}

/// A scripted `EndpointDriver`. Each `transfer`/`files_staged` call returns
/// a fresh provider task id; `set_status` scripts what the next `status`
/// poll for that id reports. Defaults to "all files present" /
/// "immediately succeeded" so a happy-path test needs no setup.
pub struct MockEndpointDriver {
    files_staged: Mutex<bool>,
    statuses: Mutex<HashMap<String, ProviderStatus>>,
    next_task_id: AtomicUsize,
    transfer_calls: Mutex<Vec<(String, String, usize)>>,
    cancel_calls: Mutex<Vec<String>>,
    status_calls: AtomicUsize,
}

impl MockEndpointDriver {
    pub fn new() -> Self {
        Self {
            files_staged: Mutex::new(true),
            statuses: Mutex::new(HashMap::new()),
            next_task_id: AtomicUsize::new(1),
            transfer_calls: Mutex::new(Vec::new()),
            cancel_calls: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn set_files_staged(&self, staged: bool) {
        *self.files_staged.lock().unwrap() = staged;
    }

    pub fn set_status(&self, task_id: &str, status: ProviderStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(task_id.to_string(), status);
    }

    pub fn transfer_calls(&self) -> Vec<(String, String, usize)> {
        self.transfer_calls.lock().unwrap().clone()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.cancel_calls.lock().unwrap().clone()
    }
}

impl Default for MockEndpointDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn succeeded_status(num_files: u32) -> ProviderStatus {
    ProviderStatus {
        code: StatusCode::Succeeded,
        num_files,
        num_files_transferred: num_files,
        num_files_skipped: 0,
        message: String::new(),
    }
}

#[async_trait]
impl EndpointDriver for MockEndpointDriver {
    async fn files_staged(
        &self,
        _source_endpoint: &str,
        _files: &[FileTransferRequest],
    ) -> Result<bool, DriverError> {
        Ok(*self.files_staged.lock().unwrap())
    }

    async fn transfer(
        &self,
        source_endpoint: &str,
        destination_endpoint: &str,
        files: &[FileTransferRequest],
    ) -> Result<String, DriverError> {
        let n = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let task_id = format!("task-{n}");
        self.transfer_calls.lock().unwrap().push((
            source_endpoint.to_string(),
            destination_endpoint.to_string(),
            files.len(),
        ));
        self.statuses
            .lock()
            .unwrap()
            .entry(task_id.clone())
            .or_insert_with(|| succeeded_status(files.len() as u32));
        Ok(task_id)
    }

    async fn status(&self, provider_task_id: &str) -> Result<ProviderStatus, DriverError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(provider_task_id)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("unknown task id: {provider_task_id}")))
    }

    async fn cancel(&self, provider_task_id: &str) -> Result<(), DriverError> {
        self.cancel_calls
            .lock()
            .unwrap()
            .push(provider_task_id.to_string());
        Ok(())
    }
}

/// In-memory append log, grounded on the same `Mutex<Vec<_>>` shape the
/// teacher uses for its mock adapters' operation logs.
pub struct MockJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl MockJournal {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Default for MockJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Journal for MockJournal {
    async fn record(&self, entry: JournalRecord) -> Result<(), JournalError> {
        self.records.lock().unwrap().push(entry);
        Ok(())
    }
}
