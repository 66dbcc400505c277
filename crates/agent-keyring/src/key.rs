//! The in-memory signing key handed out by [`KeyStore`](crate::KeyStore).

use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use crate::error::KeyStoreError;
use crate::record::{KeyId, KeyRecord, ALGORITHM};

/// An agent signing key.
///
/// The private half never leaves this type: callers ask the key to sign a
/// payload and get the signature back. A key whose stored private material
/// is missing or corrupt still verifies, but [`AgentKey::sign`] fails.
#[derive(Clone)]
pub struct AgentKey {
    key_id: KeyId,
    generation: u64,
    verifying_key: VerifyingKey,
    signing_key: Option<SigningKey>,
    created_at: DateTime<Utc>,
}

impl AgentKey {
    /// Draw a fresh key from the OS entropy source.
    pub(crate) fn generate(generation: u64) -> Result<Self, KeyStoreError> {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| KeyStoreError::KeyGenerationFailed(e.to_string()))?;
        let signing_key = SigningKey::from_bytes(&secret);
        secret.fill(0);

        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            key_id: KeyId::for_public_key(verifying_key.as_bytes()),
            generation,
            verifying_key,
            signing_key: Some(signing_key),
            created_at: Utc::now(),
        })
    }

    /// Rebuild a key from its stored record.
    ///
    /// The public half must decode and match the record's fingerprint. The
    /// private half is optional: if it is absent, malformed, or does not
    /// derive the stored public key, the key loads verify-only.
    pub(crate) fn from_record(record: &KeyRecord) -> Result<Self, KeyStoreError> {
        let corrupt = |reason: &str| KeyStoreError::CorruptRecord {
            location: format!("generation {}", record.generation),
            reason: reason.to_string(),
        };

        if record.algorithm != ALGORITHM {
            return Err(corrupt(&format!("unsupported algorithm {}", record.algorithm)));
        }

        let public: [u8; PUBLIC_KEY_LENGTH] = hex::decode(&record.public_key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| corrupt("public key is not 32 hex-encoded bytes"))?;
        let verifying_key =
            VerifyingKey::from_bytes(&public).map_err(|_| corrupt("public key is not a curve point"))?;

        if KeyId::for_public_key(&public) != record.key_id {
            return Err(corrupt("key id does not match public key"));
        }

        let signing_key = record.secret_key.as_deref().and_then(|secret_hex| {
            let secret: Option<[u8; SECRET_KEY_LENGTH]> = hex::decode(secret_hex)
                .ok()
                .and_then(|bytes| bytes.try_into().ok());
            match secret.map(|s| SigningKey::from_bytes(&s)) {
                Some(sk) if sk.verifying_key() == verifying_key => Some(sk),
                _ => {
                    warn!(
                        key_id = %record.key_id,
                        "private material is corrupt, loading key verify-only"
                    );
                    None
                }
            }
        });

        Ok(Self {
            key_id: record.key_id.clone(),
            generation: record.generation,
            verifying_key,
            signing_key,
            created_at: record.created_at,
        })
    }

    pub(crate) fn to_record(&self) -> KeyRecord {
        KeyRecord {
            key_id: self.key_id.clone(),
            generation: self.generation,
            algorithm: ALGORITHM.to_string(),
            public_key: hex::encode(self.verifying_key.as_bytes()),
            secret_key: self.signing_key.as_ref().map(|sk| hex::encode(sk.to_bytes())),
            created_at: self.created_at,
        }
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Raw 32-byte ed25519 public key.
    pub fn public_material(&self) -> Vec<u8> {
        self.verifying_key.as_bytes().to_vec()
    }

    /// Whether this key still holds usable private material.
    pub fn can_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Sign `payload`, returning the 64-byte ed25519 signature.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let signing_key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| KeyStoreError::SecretUnavailable(self.key_id.to_string()))?;
        Ok(signing_key.sign(payload).to_bytes().to_vec())
    }
}

impl fmt::Debug for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKey")
            .field("key_id", &self.key_id)
            .field("generation", &self.generation)
            .field("can_sign", &self.can_sign())
            .field("created_at", &self.created_at)
            .finish()
    }
}
