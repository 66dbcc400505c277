//! `AgentGit`: the two-call surface (commit, verify) over a shared key
//! store and engine.

use std::path::Path;
use std::sync::Arc;

use agent_keyring::{AgentKey, KeyResult, KeyStore, PublicKeyRecord, PublicKeyring};

use crate::config::AgentGitConfig;
use crate::engine::{GitCliEngine, VcsEngine};
use crate::error::Result;
use crate::gate::{AttributionGate, CommitRequest, SignedCommitResult};
use crate::identity::PartialIdentity;
use crate::verify::{PublicKeySource, VerificationReader, VerificationResult};

pub struct AgentGit {
    keys: Arc<KeyStore>,
    gate: AttributionGate,
    reader: VerificationReader,
}

impl AgentGit {
    /// Assemble the service from its collaborators. Verification uses the
    /// same key store that signs.
    pub fn new(keys: Arc<KeyStore>, engine: Arc<dyn VcsEngine>, defaults: PartialIdentity) -> Self {
        let gate = AttributionGate::new(keys.clone(), engine.clone(), defaults);
        let reader = VerificationReader::new(engine, keys.clone() as Arc<dyn PublicKeySource>);
        Self { keys, gate, reader }
    }

    /// The git-backed service with a file key store at
    /// `config.key_store_path`.
    pub fn from_config(config: &AgentGitConfig) -> KeyResult<Self> {
        let keys = KeyStore::open(&config.key_store_path)?;
        Ok(Self::new(
            Arc::new(keys),
            Arc::new(GitCliEngine::new()),
            config.default_identity(),
        ))
    }

    pub async fn commit(&self, request: CommitRequest) -> Result<SignedCommitResult> {
        self.gate.commit(request).await
    }

    pub async fn verify_attribution(&self, repo: &Path, revision: &str) -> VerificationResult {
        self.reader.verify(repo, revision).await
    }

    pub fn active_key(&self) -> KeyResult<AgentKey> {
        self.keys.ensure_active_key()
    }

    /// Retire the active key. Earlier commits keep verifying.
    pub fn rotate_key(&self) -> KeyResult<AgentKey> {
        self.keys.rotate()
    }

    pub fn keys(&self) -> KeyResult<Vec<PublicKeyRecord>> {
        self.keys.keys()
    }

    pub fn export_public_keyring(&self) -> KeyResult<PublicKeyring> {
        self.keys.export_public_keyring()
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }
}
