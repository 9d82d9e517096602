use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::error::StoreResult;
use crate::record::RecordKind;

use super::StoreBackend;

/// Process-local backend. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<RecordKind, BTreeMap<String, String>>>,
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_all(&self, kind: RecordKind) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .collections
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    fn get(&self, kind: RecordKind, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .collections
            .lock()
            .get(&kind)
            .and_then(|records| records.get(key).cloned()))
    }

    fn put(&self, kind: RecordKind, key: &str, payload: &str) -> StoreResult<()> {
        self.collections
            .lock()
            .entry(kind)
            .or_default()
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn delete(&self, kind: RecordKind, key: &str) -> StoreResult<()> {
        if let Some(records) = self.collections.lock().get_mut(&kind) {
            records.remove(key);
        }
        Ok(())
    }

    fn clear(&self, kind: RecordKind) -> StoreResult<()> {
        self.collections.lock().remove(&kind);
        Ok(())
    }
}
