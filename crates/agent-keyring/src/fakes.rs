//! In-memory fakes for the key backend (testing only)
//!
//! `MemoryKeyBackend` satisfies the `KeyBackend` contract without touching
//! disk, and can be switched offline to exercise `KeyStoreUnavailable`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::backend::{KeyBackend, KeyResult};
use crate::error::KeyStoreError;
use crate::record::KeyRecord;

/// In-memory key backend keyed by generation.
#[derive(Debug, Default)]
pub struct MemoryKeyBackend {
    records: Mutex<BTreeMap<u64, KeyRecord>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryKeyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the medium going away (`true`) or coming back (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn records(&self) -> KeyResult<MutexGuard<'_, BTreeMap<u64, KeyRecord>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(KeyStoreError::KeyStoreUnavailable(
                "memory backend is offline".to_string(),
            ));
        }
        self.records
            .lock()
            .map_err(|_| KeyStoreError::KeyStoreUnavailable("memory backend poisoned".to_string()))
    }
}

impl KeyBackend for MemoryKeyBackend {
    fn put(&self, record: &KeyRecord) -> KeyResult<()> {
        let mut records = self.records()?;
        if records.contains_key(&record.generation) {
            return Err(KeyStoreError::GenerationTaken(record.generation));
        }
        records.insert(record.generation, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self) -> KeyResult<Vec<KeyRecord>> {
        Ok(self.records()?.values().cloned().collect())
    }
}
