//! Durable key/value persistence for favorite and play-progress records.
//!
//! Backends only move JSON payloads keyed by composite key; [`RecordStore`]
//! owns the record schema and is what the coordinator talks to.

mod memory;
mod remote;
mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::key::{self, RecordKey};
use crate::record::{RecordKind, Snapshot, StoredRecord};

pub use self::memory::MemoryBackend;
pub use self::remote::{RemoteBackend, RemoteOptions};
pub use self::sqlite::SqliteBackend;

/// Raw persistence contract every backend fulfils.
///
/// `get_all` returns a full snapshot or an error, never a partial map.
/// `delete` of an absent key succeeds. `clear` either removes every record
/// of the kind or reports failure.
pub trait StoreBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn get_all(&self, kind: RecordKind) -> StoreResult<BTreeMap<String, String>>;

    fn get(&self, kind: RecordKind, key: &str) -> StoreResult<Option<String>>;

    fn put(&self, kind: RecordKind, key: &str, payload: &str) -> StoreResult<()>;

    fn delete(&self, kind: RecordKind, key: &str) -> StoreResult<()>;

    fn clear(&self, kind: RecordKind) -> StoreResult<()>;
}

/// Typed view over a backend.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn StoreBackend>,
}

impl RecordStore {
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_shared(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn get_all<R: StoredRecord>(&self) -> StoreResult<Snapshot<R>> {
        let kind = R::KIND;
        let raw = self.backend.get_all(kind)?;
        debug!(%kind, count = raw.len(), backend = self.backend.name(), "snapshot read");
        raw.into_iter()
            .map(|(key, payload)| {
                let record = decode_payload::<R>(&key, &payload)?;
                Ok((key, record))
            })
            .collect()
    }

    pub fn get<R: StoredRecord>(&self, key: &RecordKey) -> StoreResult<Option<R>> {
        self.backend
            .get(R::KIND, key.as_str())?
            .map(|payload| decode_payload::<R>(key.as_str(), &payload))
            .transpose()
    }

    pub fn put<R: StoredRecord>(&self, key: &RecordKey, record: &R) -> StoreResult<()> {
        record.validate(key.as_str())?;
        if let Some(reason) = identity_mismatch(key.as_str(), record) {
            return Err(StoreError::InvalidRecord {
                kind: R::KIND,
                key: key.to_string(),
                reason,
            });
        }
        let payload = serde_json::to_string(record).map_err(|err| StoreError::Codec {
            kind: R::KIND,
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        let kind = R::KIND;
        debug!(%kind, %key, backend = self.backend.name(), "put");
        self.backend.put(kind, key.as_str(), &payload)
    }

    pub fn delete(&self, kind: RecordKind, key: &RecordKey) -> StoreResult<()> {
        debug!(%kind, %key, backend = self.backend.name(), "delete");
        self.backend.delete(kind, key.as_str())
    }

    pub fn clear(&self, kind: RecordKind) -> StoreResult<()> {
        debug!(%kind, backend = self.backend.name(), "clear");
        self.backend.clear(kind)
    }
}

fn decode_payload<R: StoredRecord>(key: &str, payload: &str) -> StoreResult<R> {
    let record: R = serde_json::from_str(payload).map_err(|err| StoreError::Codec {
        kind: R::KIND,
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    if let Some(reason) = identity_mismatch(key, &record) {
        return Err(StoreError::Codec {
            kind: R::KIND,
            key: key.to_string(),
            reason,
        });
    }
    record.validate(key)?;
    Ok(record)
}

/// Describes how a record's `source`/`id` disagree with the key it is stored under.
fn identity_mismatch<R: StoredRecord>(key: &str, record: &R) -> Option<String> {
    let expected = match key::decode(key) {
        Ok(parts) => parts,
        Err(err) => return Some(err.to_string()),
    };
    let (source, id) = record.identity();
    (expected != (source, id)).then(|| format!("record identity {source}+{id} does not match key"))
}
