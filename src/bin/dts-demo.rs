//! Wires a `Dispatcher` up with the in-memory mock adapters and drives one
//! transfer end to end, in the spirit of the teacher's `main.rs` CSV demo:
//! not a product surface, just a runnable smoke path.
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌───────┐    ┌────────────┐
//! │  Config  │───▶│ Dispatcher │───▶│ Store │───▶│ Stager/... │
//! └──────────┘    └────────────┘    └───────┘    └────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dts_core::config::{Config, DatabaseConfig, ServiceConfig};
use dts_core::model::{Destination, FileDescriptor, StatusCode, TransferSpec, User};
use dts_core::testing::{MockDatabaseAdapter, MockEndpointDriver, MockJournal};
use dts_core::{DatabaseAdapter, Dispatcher, EndpointDriver, Journal};
use serde_json::Map;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let manifest_dir = tempfile::tempdir()?;

    let config = Config {
        service: ServiceConfig {
            poll_interval_ms: 50,
            endpoint: "local-service".to_string(),
            data_directory: data_dir.path().to_string_lossy().to_string(),
            manifest_directory: manifest_dir.path().to_string_lossy().to_string(),
            delete_after_secs: 3600,
        },
        databases: {
            let mut m = HashMap::new();
            m.insert(
                "jdp".to_string(),
                DatabaseConfig {
                    endpoint: "globus-dest".to_string(),
                },
            );
            m
        },
        credentials: HashMap::new(),
        logging: Default::default(),
    };

    let _guard = dts_core::logging::init_logging(&config.logging);

    let source = Arc::new(
        MockDatabaseAdapter::new()
            .with_file(descriptor("file-1"))
            .with_file(descriptor("file-2")),
    );
    source.set_endpoint_names(vec!["globus-source".to_string()]);

    let destination = Arc::new(MockDatabaseAdapter::new());
    destination.set_local_user("demo-user");

    let driver = Arc::new(MockEndpointDriver::new());
    driver.set_files_staged(true);

    let mut database_adapters: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
    database_adapters.insert("globus-source-db".to_string(), source);
    database_adapters.insert("jdp".to_string(), destination);

    let mut endpoint_drivers: HashMap<String, Arc<dyn EndpointDriver>> = HashMap::new();
    endpoint_drivers.insert("globus-source".to_string(), driver.clone());
    endpoint_drivers.insert("globus-dest".to_string(), driver.clone());
    endpoint_drivers.insert("local-service".to_string(), driver);

    let journal: Arc<dyn Journal> = Arc::new(MockJournal::new());
    let dispatcher = Dispatcher::new(config, database_adapters, endpoint_drivers, journal);

    dispatcher.start().await?;

    let spec = TransferSpec {
        source: "globus-source-db".to_string(),
        destination: Destination::Database("jdp".to_string()),
        file_ids: vec!["file-1".to_string(), "file-2".to_string()],
        user: User {
            name: "Demo User".to_string(),
            email: "demo@example.org".to_string(),
            orcid: "0000-0000-0000-0002".to_string(),
            organization: None,
        },
        description: "smoke test transfer".to_string(),
        instructions: Map::new(),
        time_of_request: chrono::Utc::now(),
    };

    let id = dispatcher.create_transfer(spec).await?;
    info!(transfer_id = %id, "transfer created");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = dispatcher.get_transfer_status(id).await?;
        info!(transfer_id = %id, status = ?status.code, "polled status");
        if status.code.is_terminal() {
            match status.code {
                StatusCode::Succeeded => println!("transfer {id} succeeded"),
                StatusCode::Failed => println!("transfer {id} failed: {}", status.message),
                _ => unreachable!(),
            }
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("transfer {id} did not reach a terminal state in time");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    dispatcher.stop().await?;
    Ok(())
}

fn descriptor(id: &str) -> FileDescriptor {
    FileDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        path: format!("demo-data/{id}"),
        format: "text/plain".to_string(),
        mediatype: None,
        bytes: 1024,
        hash: "deadbeef".to_string(),
        endpoint: None,
        credit: None,
        sources: None,
        extra: Map::new(),
    }
}
