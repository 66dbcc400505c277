//! Persisted key records and the public keyring handed to verifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KeyStoreError;

/// Signature algorithm recorded alongside every key.
pub const ALGORITHM: &str = "ed25519";

/// Number of fingerprint bytes kept in a [`KeyId`].
const KEY_ID_BYTES: usize = 16;

/// Stable key identifier: the first 16 bytes of SHA-256 over the public key,
/// lowercase hex.
///
/// The inner field is private so a `KeyId` is always a well-formed
/// fingerprint, either computed by [`KeyId::for_public_key`] or validated by
/// `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Fingerprint a public key.
    pub fn for_public_key(public_key: &[u8]) -> Self {
        let hash = Sha256::digest(public_key);
        KeyId(hex::encode(&hash[..KEY_ID_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 hex chars) for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl TryFrom<String> for KeyId {
    type Error = KeyStoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let well_formed = s.len() == KEY_ID_BYTES * 2
            && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(KeyStoreError::InvalidKeyId(s));
        }
        Ok(KeyId(s))
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

impl FromStr for KeyId {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyId::try_from(s.to_ascii_lowercase())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One signing key as written to the backing store.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: KeyId,
    /// Monotonic counter; the highest generation is the active key.
    pub generation: u64,
    pub algorithm: String,
    /// Hex-encoded public key.
    pub public_key: String,
    /// Hex-encoded private key. Absent for verify-only records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// Strip the private half.
    pub fn public(&self) -> PublicKeyRecord {
        PublicKeyRecord {
            key_id: self.key_id.clone(),
            generation: self.generation,
            algorithm: self.algorithm.clone(),
            public_key: self.public_key.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("generation", &self.generation)
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Public half of a key record; safe to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub key_id: KeyId,
    pub generation: u64,
    pub algorithm: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl PublicKeyRecord {
    /// Decoded public key bytes, or `None` if the hex is malformed.
    pub fn public_bytes(&self) -> Option<Vec<u8>> {
        hex::decode(&self.public_key).ok()
    }
}

/// Exported public material of every retained key.
///
/// This is the trust anchor third parties pin: a verifier holding a
/// `PublicKeyring` can check agent signatures without any access to the
/// key store itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyring {
    /// Keys ordered newest first.
    pub keys: Vec<PublicKeyRecord>,
}

impl PublicKeyring {
    pub fn new(mut keys: Vec<PublicKeyRecord>) -> Self {
        keys.sort_by(|a, b| b.generation.cmp(&a.generation));
        Self { keys }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let ring: PublicKeyring = serde_json::from_str(json)?;
        Ok(Self::new(ring.keys))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn get(&self, key_id: &KeyId) -> Option<&PublicKeyRecord> {
        self.keys.iter().find(|k| &k.key_id == key_id)
    }

    /// The key new signatures are expected to use.
    pub fn active(&self) -> Option<&PublicKeyRecord> {
        self.keys.first()
    }
}
