//! Key lifecycle: first-use generation, rotation, and lookup of retained keys.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::backend::{KeyBackend, KeyResult};
use crate::error::KeyStoreError;
use crate::fakes::MemoryKeyBackend;
use crate::fs::FsKeyBackend;
use crate::key::AgentKey;
use crate::record::{KeyId, KeyRecord, PublicKeyRecord, PublicKeyring};

/// Owner of the agent's signing keys.
///
/// Exactly one key is active at a time: the one with the highest generation
/// in the backend. Generation and rotation run under a lock scoped to the
/// store, so concurrent first-time callers converge on a single key. Across
/// processes, the backend's create-only `put` settles the race and the loser
/// adopts the winner's record.
pub struct KeyStore {
    backend: Box<dyn KeyBackend>,
    active: Mutex<Option<AgentKey>>,
}

impl KeyStore {
    pub fn new(backend: impl KeyBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            active: Mutex::new(None),
        }
    }

    /// Open a filesystem-backed store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> KeyResult<Self> {
        Ok(Self::new(FsKeyBackend::new(root)?))
    }

    /// Store with no persistence beyond this process.
    pub fn in_memory() -> Self {
        Self::new(MemoryKeyBackend::new())
    }

    /// Return the active key, generating and persisting one on first use.
    pub fn ensure_active_key(&self) -> KeyResult<AgentKey> {
        let mut active = self.lock_active()?;
        let newest = newest(self.backend.list()?);

        match (newest, active.as_ref()) {
            (Some(record), Some(cached)) if record.generation == cached.generation() => {
                Ok(cached.clone())
            }
            (Some(record), _) => {
                let key = AgentKey::from_record(&record)?;
                debug!(key_id = %key.key_id(), generation = key.generation(), "loaded active key");
                *active = Some(key.clone());
                Ok(key)
            }
            (None, _) => {
                let key = self.create_generation(1)?;
                *active = Some(key.clone());
                Ok(key)
            }
        }
    }

    /// Generate a new active key. Prior keys stay retrievable for
    /// verification but never sign again.
    pub fn rotate(&self) -> KeyResult<AgentKey> {
        let mut active = self.lock_active()?;
        let previous = newest(self.backend.list()?);
        let next = previous.as_ref().map_or(1, |r| r.generation + 1);

        let key = self.create_generation(next)?;
        info!(
            event = "key.rotated",
            key_id = %key.key_id(),
            previous_key_id = previous.as_ref().map(|r| r.key_id.to_string()).unwrap_or_default(),
            generation = key.generation(),
        );
        *active = Some(key.clone());
        Ok(key)
    }

    /// Public material of any retained key.
    pub fn public_material(&self, key_id: &KeyId) -> KeyResult<Vec<u8>> {
        let record = self
            .backend
            .get(key_id)?
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))?;
        Ok(AgentKey::from_record(&record)?.public_material())
    }

    /// Public half of every retained key, newest first.
    pub fn keys(&self) -> KeyResult<Vec<PublicKeyRecord>> {
        let mut records: Vec<PublicKeyRecord> =
            self.backend.list()?.iter().map(KeyRecord::public).collect();
        records.sort_by(|a, b| b.generation.cmp(&a.generation));
        Ok(records)
    }

    /// Id of the active key without generating one.
    pub fn active_key_id(&self) -> KeyResult<Option<KeyId>> {
        Ok(newest(self.backend.list()?).map(|r| r.key_id))
    }

    /// Export every retained public key as the published trust anchor.
    pub fn export_public_keyring(&self) -> KeyResult<PublicKeyring> {
        Ok(PublicKeyring::new(self.keys()?))
    }

    fn create_generation(&self, generation: u64) -> KeyResult<AgentKey> {
        let key = AgentKey::generate(generation)?;
        match self.backend.put(&key.to_record()) {
            Ok(()) => {
                info!(
                    event = "key.generated",
                    key_id = %key.key_id(),
                    generation = generation,
                );
                Ok(key)
            }
            Err(KeyStoreError::GenerationTaken(_)) => {
                debug!(generation, "generation written concurrently, adopting stored key");
                let record = self
                    .backend
                    .list()?
                    .into_iter()
                    .find(|r| r.generation == generation)
                    .ok_or_else(|| {
                        KeyStoreError::KeyStoreUnavailable(format!(
                            "generation {generation} reported taken but not readable"
                        ))
                    })?;
                AgentKey::from_record(&record)
            }
            Err(e) => Err(e),
        }
    }

    fn lock_active(&self) -> KeyResult<MutexGuard<'_, Option<AgentKey>>> {
        self.active
            .lock()
            .map_err(|_| KeyStoreError::KeyStoreUnavailable("key store lock poisoned".to_string()))
    }
}

fn newest(records: Vec<KeyRecord>) -> Option<KeyRecord> {
    records.into_iter().max_by_key(|r| r.generation)
}
