//! Storage trait for key records.
//!
//! The persistence medium (local files, an OS credential store, a remote
//! secret service) sits behind `KeyBackend` so the key lifecycle and the
//! signing logic never depend on where records live. In-memory fakes are
//! provided for testing via the `fakes` module.

use crate::error::KeyStoreError;
use crate::record::{KeyId, KeyRecord};

/// Result type for key store operations
pub type KeyResult<T> = std::result::Result<T, KeyStoreError>;

/// Durable home for key records.
///
/// Guarantees:
/// - `put` is create-only per generation: writing a generation that already
///   exists fails with `KeyStoreError::GenerationTaken` and leaves the stored
///   record untouched.
/// - A reader never observes a partially written record.
/// - `list` returns every record ever stored, in no particular order.
pub trait KeyBackend: Send + Sync {
    /// Store a new record.
    fn put(&self, record: &KeyRecord) -> KeyResult<()>;

    /// List all stored records.
    fn list(&self) -> KeyResult<Vec<KeyRecord>>;

    /// Fetch a record by id.
    fn get(&self, key_id: &KeyId) -> KeyResult<Option<KeyRecord>> {
        Ok(self.list()?.into_iter().find(|r| &r.key_id == key_id))
    }
}

impl<B: KeyBackend + ?Sized> KeyBackend for std::sync::Arc<B> {
    fn put(&self, record: &KeyRecord) -> KeyResult<()> {
        (**self).put(record)
    }

    fn list(&self) -> KeyResult<Vec<KeyRecord>> {
        (**self).list()
    }

    fn get(&self, key_id: &KeyId) -> KeyResult<Option<KeyRecord>> {
        (**self).get(key_id)
    }
}
