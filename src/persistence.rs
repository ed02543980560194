//! The durable checkpoint format (spec.md §5 "Durability", §6 "Persisted
//! state layout"): a single `dts.bin` file in the data directory holding,
//! in order, the Store table, Stager entries, Mover operations, and
//! Manifestor entries.
//!
//! Generalizes the teacher's `wal_v2.rs` checksum-trailer framing (a
//! 20-byte header + CRC32 per WAL entry) from one entry to a whole-file
//! snapshot: the payload is a single `bincode`-encoded [`Snapshot`]
//! followed by an 8-byte CRC-64 trailer, so a truncated or corrupted file
//! is detected at load instead of silently misparsed (SPEC_FULL.md §1).

use std::collections::HashMap;
use std::path::Path;

use crc::{Crc, CRC_64_XZ};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ManifestEntry, MoveOperation, TransferRecord};
use crate::stager::Entry as StagerEntry;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);
const TRAILER_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub store: HashMap<Uuid, TransferRecord>,
    pub stager: HashMap<Uuid, StagerEntry>,
    pub mover: HashMap<Uuid, Vec<MoveOperation>>,
    pub manifestor: HashMap<Uuid, ManifestEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("checkpoint file is truncated (shorter than the trailer)")]
    Truncated,

    #[error("checkpoint checksum mismatch: file is corrupt")]
    ChecksumMismatch,
}

/// Writes `snapshot` to `path` as `bincode(snapshot) || crc64(bincode(snapshot))`.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), PersistenceError> {
    let payload = bincode::serialize(snapshot)?;
    let checksum = CRC64.checksum(&payload);
    let mut out = Vec::with_capacity(payload.len() + TRAILER_LEN);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum.to_le_bytes());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("bin.tmp");
    std::fs::write(&tmp_path, &out)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads a snapshot written by [`save`]. Returns `Ok(None)` if `path`
/// doesn't exist — presence of the file is what triggers resume (spec.md
/// §6).
pub fn load(path: &Path) -> Result<Option<Snapshot>, PersistenceError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.len() < TRAILER_LEN {
        return Err(PersistenceError::Truncated);
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    let expected = u64::from_le_bytes(trailer.try_into().expect("trailer is 8 bytes"));
    let actual = CRC64.checksum(payload);
    if actual != expected {
        return Err(PersistenceError::ChecksumMismatch);
    }
    let snapshot = bincode::deserialize(payload)?;
    Ok(Some(snapshot))
}

/// spec.md §5: "an agent whose entry exists for an absent Store record
/// must discard it on load." Filters every non-Store table down to the
/// ids the Store actually resumed.
pub fn reconcile(mut snapshot: Snapshot) -> Snapshot {
    let live: std::collections::HashSet<Uuid> = snapshot.store.keys().copied().collect();
    snapshot.stager.retain(|id, _| live.contains(id));
    snapshot.mover.retain(|id, _| live.contains(id));
    snapshot.manifestor.retain(|id, _| live.contains(id));
    snapshot
}
