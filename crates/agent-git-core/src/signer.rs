//! Commit signing and signature checks.

use agent_keyring::{AgentKey, KeyId, ALGORITHM};
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH};

const ARMOR_BEGIN: &str = "-----BEGIN AGENT SIGNATURE-----";
const ARMOR_END: &str = "-----END AGENT SIGNATURE-----";

/// Signing could not produce a signature.
#[derive(Debug, thiserror::Error)]
#[error("signing with key {key_id} failed: {reason}")]
pub struct SigningError {
    pub key_id: String,
    pub reason: String,
}

/// Stateless ed25519 signer for commit payloads.
pub struct CommitSigner;

impl CommitSigner {
    /// Sign `payload` with `key`. Ed25519 is deterministic, so the same
    /// payload and key always give the same signature.
    pub fn sign(payload: &[u8], key: &AgentKey) -> Result<Vec<u8>, SigningError> {
        key.sign(payload).map_err(|e| SigningError {
            key_id: key.key_id().to_string(),
            reason: e.to_string(),
        })
    }

    /// Check `signature` over `payload` against a raw 32-byte public key.
    ///
    /// Total: malformed keys and signatures return `false`.
    pub fn verify(payload: &[u8], signature: &[u8], public_material: &[u8]) -> bool {
        let Ok(public) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(public_material) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify_strict(payload, &signature).is_ok()
    }
}

/// The armored block stored in a commit's signature header.
///
/// ```text
/// -----BEGIN AGENT SIGNATURE-----
/// Key-Id: <32 hex chars>
/// Algorithm: ed25519
///
/// <signature, 128 hex chars>
/// -----END AGENT SIGNATURE-----
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    /// Key the signer claims to have used; `None` if absent or malformed.
    pub key_id: Option<KeyId>,
    pub signature: Vec<u8>,
}

impl SignatureBlock {
    pub fn new(key_id: KeyId, signature: Vec<u8>) -> Self {
        Self {
            key_id: Some(key_id),
            signature,
        }
    }

    pub fn to_armored(&self) -> String {
        let mut out = format!("{ARMOR_BEGIN}\n");
        if let Some(key_id) = &self.key_id {
            out.push_str(&format!("Key-Id: {key_id}\n"));
        }
        out.push_str(&format!("Algorithm: {ALGORITHM}\n\n"));
        out.push_str(&hex::encode(&self.signature));
        out.push('\n');
        out.push_str(ARMOR_END);
        out
    }

    /// Parse an armored block. Returns `None` for anything that is not an
    /// agent signature (PGP, SSH, truncated or garbled blocks).
    pub fn parse(armored: &str) -> Option<Self> {
        let mut lines = armored.lines().map(str::trim_end);
        if lines.next()? != ARMOR_BEGIN {
            return None;
        }

        let mut key_id = None;
        let mut algorithm = None;
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(": ")?;
            match name {
                "Key-Id" => key_id = value.parse::<KeyId>().ok(),
                "Algorithm" => algorithm = Some(value.to_string()),
                _ => {}
            }
        }
        if algorithm.as_deref() != Some(ALGORITHM) {
            return None;
        }

        let mut body = String::new();
        for line in lines {
            if line == ARMOR_END {
                let signature = hex::decode(body).ok()?;
                return Some(Self { key_id, signature });
            }
            body.push_str(line.trim());
        }
        None
    }
}
