//! Error types for agent-keyring

use thiserror::Error;

/// Errors that can occur while managing signing keys
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// No key with this id has ever been stored
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Entropy source or key construction failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Persistence medium unreachable (I/O failure, poisoned lock, offline backend)
    #[error("Key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// A record for this generation already exists (create-only write lost a race)
    #[error("Key generation {0} already taken")]
    GenerationTaken(u64),

    /// A stored record could not be decoded
    #[error("Corrupt key record {location}: {reason}")]
    CorruptRecord { location: String, reason: String },

    /// Key id is not a 32-char lowercase hex fingerprint
    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    /// The key carries no usable private material
    #[error("Private material unavailable for key {0}")]
    SecretUnavailable(String),
}

impl From<std::io::Error> for KeyStoreError {
    fn from(err: std::io::Error) -> Self {
        KeyStoreError::KeyStoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_unavailable() {
        let err: KeyStoreError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, KeyStoreError::KeyStoreUnavailable(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn corrupt_record_display_names_location() {
        let err = KeyStoreError::CorruptRecord {
            location: "key-00000001.json".to_string(),
            reason: "bad hex".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("key-00000001.json"));
        assert!(msg.contains("bad hex"));
    }
}
