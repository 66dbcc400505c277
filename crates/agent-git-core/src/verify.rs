//! Attribution checks for recorded commits.
//!
//! Verification never fails: an unreadable revision, a human commit, a
//! missing or foreign signature and a forged one all come back as a
//! [`VerificationResult`] describing what was found.

use std::path::Path;
use std::sync::Arc;

use agent_keyring::{KeyId, KeyStore, PublicKeyring};
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::VcsEngine;
use crate::identity::{parse_author, AgentIdentity};
use crate::metrics::METRICS;
use crate::obs;
use crate::signer::{CommitSigner, SignatureBlock};

/// Where verification finds public keys.
pub trait PublicKeySource: Send + Sync {
    /// Public key bytes for `key_id`, if known.
    fn public_key(&self, key_id: &KeyId) -> Option<Vec<u8>>;

    /// Every known key, newest first.
    fn candidates(&self) -> Vec<(KeyId, Vec<u8>)>;
}

impl PublicKeySource for KeyStore {
    fn public_key(&self, key_id: &KeyId) -> Option<Vec<u8>> {
        match self.public_material(key_id) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(key_id = %key_id, error = %e, "key not available for verification");
                None
            }
        }
    }

    fn candidates(&self) -> Vec<(KeyId, Vec<u8>)> {
        match self.keys() {
            Ok(records) => records
                .into_iter()
                .filter_map(|r| Some((r.key_id.clone(), r.public_bytes()?)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "key store unavailable during verification");
                Vec::new()
            }
        }
    }
}

/// An exported keyring is untrusted input: entries whose id does not match
/// their public key are ignored.
impl PublicKeySource for PublicKeyring {
    fn public_key(&self, key_id: &KeyId) -> Option<Vec<u8>> {
        let bytes = self.get(key_id)?.public_bytes()?;
        (&KeyId::for_public_key(&bytes) == key_id).then_some(bytes)
    }

    fn candidates(&self) -> Vec<(KeyId, Vec<u8>)> {
        self.keys
            .iter()
            .filter_map(|r| {
                let bytes = r.public_bytes()?;
                (KeyId::for_public_key(&bytes) == r.key_id).then(|| (r.key_id.clone(), bytes))
            })
            .collect()
    }
}

/// Outcome of checking one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// The author string parses as `<agent> on behalf of <operator> <<email>>`.
    /// This is a claim, not proof; see `signature_valid`.
    pub is_agent_authored: bool,
    /// The commit carries a signature that checks out against a known key.
    pub signature_valid: bool,
    /// Key that verified the signature, or the key the signature claims
    /// when verification failed.
    pub key_id: Option<KeyId>,
    /// Identity parsed from the author header.
    pub identity: Option<AgentIdentity>,
    /// Resolved commit hash, when the revision could be read.
    pub commit_hash: Option<String>,
}

impl VerificationResult {
    fn unreadable() -> Self {
        Self {
            is_agent_authored: false,
            signature_valid: false,
            key_id: None,
            identity: None,
            commit_hash: None,
        }
    }

    /// Authored by an agent and cryptographically confirmed.
    pub fn is_attributed(&self) -> bool {
        self.is_agent_authored && self.signature_valid
    }
}

/// Reads commits back and checks their attribution.
pub struct VerificationReader {
    engine: Arc<dyn VcsEngine>,
    keys: Arc<dyn PublicKeySource>,
}

impl VerificationReader {
    pub fn new(engine: Arc<dyn VcsEngine>, keys: Arc<dyn PublicKeySource>) -> Self {
        Self { engine, keys }
    }

    /// Check `revision` in `repo`. Takes no lock.
    pub async fn verify(&self, repo: &Path, revision: &str) -> VerificationResult {
        let result = self.check(repo, revision).await;
        METRICS.record_verification(result.signature_valid);
        obs::emit_verify_completed(
            revision,
            result.is_agent_authored,
            result.signature_valid,
            result.key_id.as_ref().map(KeyId::as_str),
        );
        result
    }

    async fn check(&self, repo: &Path, revision: &str) -> VerificationResult {
        let raw = match self.engine.read_commit(repo, revision).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(revision, error = %e, "revision unreadable");
                return VerificationResult::unreadable();
            }
        };

        let identity = parse_author(&raw.author).ok();
        let mut result = VerificationResult {
            is_agent_authored: identity.is_some(),
            signature_valid: false,
            key_id: None,
            identity,
            commit_hash: Some(raw.hash.clone()),
        };
        if !result.is_agent_authored {
            return result;
        }

        let Some(block) = raw.signature.as_deref().and_then(SignatureBlock::parse) else {
            debug!(commit = %raw.hash, "no agent signature");
            return result;
        };
        result.key_id = block.key_id.clone();

        match self.find_signer(&raw.payload, &block) {
            Some(key_id) => {
                result.signature_valid = true;
                result.key_id = Some(key_id);
            }
            None => warn!(commit = %raw.hash, "agent signature does not verify"),
        }
        result
    }

    /// The claimed key first, then every other known key newest to oldest.
    fn find_signer(&self, payload: &[u8], block: &SignatureBlock) -> Option<KeyId> {
        if let Some(claimed) = &block.key_id {
            if let Some(public) = self.keys.public_key(claimed) {
                if CommitSigner::verify(payload, &block.signature, &public) {
                    return Some(claimed.clone());
                }
            }
        }

        self.keys
            .candidates()
            .into_iter()
            .filter(|(id, _)| Some(id) != block.key_id.as_ref())
            .find(|(_, public)| CommitSigner::verify(payload, &block.signature, public))
            .map(|(id, _)| id)
    }
}
