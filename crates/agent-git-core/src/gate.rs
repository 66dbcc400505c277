//! The attribution gate: the only way an agent commit gets recorded.
//!
//! A commit moves through `Received -> Validated -> Staged -> Signed ->
//! Committed`. Validation and key lookup happen before the repository is
//! touched. Reading HEAD, staging, signing and recording run under a lock
//! keyed by the repository's top-level directory, and the signature exists
//! before the engine is asked to record anything, so an unsigned agent
//! commit never becomes visible.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agent_keyring::{AgentKey, KeyId, KeyStore, KeyStoreError};
use chrono::Utc;
use serde::Serialize;
use tracing::Instrument;

use crate::engine::VcsEngine;
use crate::error::{AttributionError, EngineError, RepoState, Result};
use crate::identity::{format_author, format_message, PartialIdentity};
use crate::metrics::METRICS;
use crate::obs;
use crate::payload::CommitPayload;
use crate::signer::{CommitSigner, SignatureBlock};

/// Stages of one commit, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    Received,
    Validated,
    Staged,
    Signed,
    Committed,
}

impl CommitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStage::Received => "received",
            CommitStage::Validated => "validated",
            CommitStage::Staged => "staged",
            CommitStage::Signed => "signed",
            CommitStage::Committed => "committed",
        }
    }
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to commit on behalf of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub repository_path: PathBuf,
    pub message: String,
    /// Per-call identity; missing fields fall back to the gate's defaults.
    pub identity: PartialIdentity,
    /// Paths to stage. Empty keeps whatever is already staged.
    pub staged_paths: Vec<PathBuf>,
}

impl CommitRequest {
    pub fn new(repository_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            repository_path: repository_path.into(),
            message: message.into(),
            identity: PartialIdentity::default(),
            staged_paths: Vec::new(),
        }
    }

    pub fn with_identity(mut self, identity: PartialIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.identity.agent_name = Some(name.into());
        self
    }

    pub fn operator_name(mut self, name: impl Into<String>) -> Self {
        self.identity.operator_name = Some(name.into());
        self
    }

    pub fn operator_email(mut self, email: impl Into<String>) -> Self {
        self.identity.operator_email = Some(email.into());
        self
    }

    pub fn files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.staged_paths.extend(paths.into_iter().map(Into::into));
        self
    }
}

/// A recorded, signed agent commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedCommitResult {
    pub commit_hash: String,
    /// Armored signature block embedded in the commit.
    pub signature: String,
    pub formatted_message: String,
    pub formatted_author: String,
    pub key_id: KeyId,
    /// Human-readable summary for the caller.
    pub confirmation: String,
}

/// Serializes commits per repository and produces signed commits.
pub struct AttributionGate {
    keys: Arc<KeyStore>,
    engine: Arc<dyn VcsEngine>,
    defaults: PartialIdentity,
    repo_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl AttributionGate {
    pub fn new(keys: Arc<KeyStore>, engine: Arc<dyn VcsEngine>, defaults: PartialIdentity) -> Self {
        Self {
            keys,
            engine,
            defaults,
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &PartialIdentity {
        &self.defaults
    }

    /// Validate, stage, sign and record one commit.
    ///
    /// Validation errors and key-store errors leave the repository
    /// untouched. Staging, signing and commit failures report the
    /// [`RepoState`] they left behind.
    ///
    /// Dropping the returned future cancels the commit. An engine call
    /// already in flight still runs to completion and the repository lock
    /// is held until it does; the commit is then abandoned unless it had
    /// already been handed to the engine for recording.
    pub async fn commit(&self, request: CommitRequest) -> Result<SignedCommitResult> {
        let span = obs::commit_span(&request.repository_path);
        let result = self.run(request).instrument(span).await;
        match &result {
            Ok(_) => METRICS.inc_commits_signed(),
            Err(_) => METRICS.inc_commits_rejected(),
        }
        result
    }

    async fn run(&self, request: CommitRequest) -> Result<SignedCommitResult> {
        let CommitRequest {
            repository_path: repo,
            message,
            identity,
            staged_paths,
        } = request;
        obs::emit_commit_stage(CommitStage::Received.as_str());

        let formatted_message =
            format_message(&message).map_err(|e| rejected(CommitStage::Received, e.into()))?;
        let identity = identity
            .resolve(&self.defaults)
            .map_err(|e| rejected(CommitStage::Received, e))?;
        let formatted_author = format_author(&identity);
        obs::emit_commit_stage(CommitStage::Validated.as_str());

        // Key backends do blocking file IO.
        let keys = self.keys.clone();
        let key = tokio::task::spawn_blocking(move || keys.ensure_active_key())
            .await
            .unwrap_or_else(|e| Err(KeyStoreError::KeyStoreUnavailable(e.to_string())))
            .map_err(|e| rejected(CommitStage::Validated, e.into()))?;

        let root = self.engine.repo_root(&repo).await.map_err(|e| {
            rejected(
                CommitStage::Validated,
                AttributionError::StagingFailed {
                    state: RepoState::Unchanged,
                    reason: e.to_string(),
                },
            )
        })?;
        let paths = paths_from_root(&repo, &root, staged_paths);
        let after_stage = if paths.is_empty() {
            RepoState::Unchanged
        } else {
            RepoState::StagedNotCommitted
        };

        let guard = self.repo_lock(&root).lock_owned().await;
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(cancelled.clone());

        let locked = LockedCommit {
            engine: self.engine.clone(),
            root,
            paths,
            after_stage,
            formatted_author,
            formatted_message,
            key,
            cancelled,
        };
        // The locked section runs as its own task so that a dropped caller
        // cannot interrupt it between engine calls.
        tokio::spawn(
            async move {
                let _guard = guard;
                locked.run().await
            }
            .in_current_span(),
        )
        .await
        .unwrap_or_else(|e| {
            Err(rejected(
                CommitStage::Validated,
                AttributionError::CommitFailed {
                    state: after_stage,
                    reason: format!("commit task failed: {e}"),
                },
            ))
        })
    }

    fn repo_lock(&self, root: &Path) -> Arc<tokio::sync::Mutex<()>> {
        // Canonical form so `repo` and `repo/.` share one lock.
        let key = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let mut locks = self
            .repo_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map holds an idle lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.repo_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Sets the flag when the caller's future goes away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Everything the commit needs once the repository lock is held.
struct LockedCommit {
    engine: Arc<dyn VcsEngine>,
    root: PathBuf,
    paths: Vec<PathBuf>,
    after_stage: RepoState,
    formatted_author: String,
    formatted_message: String,
    key: AgentKey,
    cancelled: Arc<AtomicBool>,
}

impl LockedCommit {
    async fn run(self) -> Result<SignedCommitResult> {
        let LockedCommit {
            engine,
            root,
            paths,
            after_stage,
            formatted_author,
            formatted_message,
            key,
            cancelled,
        } = self;
        let check_cancelled = |stage: CommitStage, state: RepoState| {
            if cancelled.load(Ordering::SeqCst) {
                return Err(rejected(
                    stage,
                    AttributionError::CommitFailed {
                        state,
                        reason: "commit cancelled".to_string(),
                    },
                ));
            }
            Ok(())
        };

        let parent = engine.head(&root).await.map_err(|e| {
            rejected(
                CommitStage::Validated,
                AttributionError::StagingFailed {
                    state: RepoState::Unchanged,
                    reason: e.to_string(),
                },
            )
        })?;
        check_cancelled(CommitStage::Validated, RepoState::Unchanged)?;

        engine.stage_files(&root, &paths).await.map_err(|e| {
            rejected(
                CommitStage::Validated,
                AttributionError::StagingFailed {
                    state: RepoState::Unchanged,
                    reason: e.to_string(),
                },
            )
        })?;
        check_cancelled(CommitStage::Validated, after_stage)?;

        let staging_failed = |e: EngineError| {
            rejected(
                CommitStage::Validated,
                AttributionError::StagingFailed {
                    state: after_stage,
                    reason: e.to_string(),
                },
            )
        };
        let tree = engine.staged_tree(&root).await.map_err(staging_failed)?;
        let unchanged = match parent.as_deref() {
            Some(parent) => {
                engine
                    .read_commit(&root, parent)
                    .await
                    .map_err(staging_failed)?
                    .tree
                    == tree
            }
            None => engine
                .tree_is_empty(&root, &tree)
                .await
                .map_err(staging_failed)?,
        };
        if unchanged {
            return Err(rejected(
                CommitStage::Validated,
                AttributionError::CommitFailed {
                    state: RepoState::Unchanged,
                    reason: "nothing to commit".to_string(),
                },
            ));
        }
        check_cancelled(CommitStage::Validated, after_stage)?;
        obs::emit_commit_stage(CommitStage::Staged.as_str());

        let payload = CommitPayload {
            tree,
            parents: parent.iter().cloned().collect(),
            author: formatted_author.clone(),
            committer: formatted_author.clone(),
            timestamp: Utc::now().timestamp(),
            message: formatted_message.clone(),
        };

        let signature = CommitSigner::sign(&payload.to_bytes(), &key).map_err(|e| {
            rejected(
                CommitStage::Staged,
                AttributionError::SigningFailed {
                    state: after_stage,
                    reason: e.to_string(),
                },
            )
        })?;
        let armored = SignatureBlock::new(key.key_id().clone(), signature).to_armored();
        obs::emit_commit_stage(CommitStage::Signed.as_str());
        check_cancelled(CommitStage::Signed, after_stage)?;

        let commit_hash = engine
            .write_commit(&root, &payload.to_signed_bytes(&armored), parent.as_deref())
            .await
            .map_err(|e| {
                rejected(
                    CommitStage::Signed,
                    AttributionError::CommitFailed {
                        state: after_stage,
                        reason: e.to_string(),
                    },
                )
            })?;
        obs::emit_commit_stage(CommitStage::Committed.as_str());
        obs::emit_commit_signed(&commit_hash, key.key_id().as_str(), &formatted_author);

        let confirmation = format!(
            "Changes committed successfully with hash {commit_hash} (as '{formatted_author}')"
        );
        Ok(SignedCommitResult {
            commit_hash,
            signature: armored,
            formatted_message,
            formatted_author,
            key_id: key.key_id().clone(),
            confirmation,
        })
    }
}

/// Rewrite paths given relative to `repo` so they are relative to the
/// repository `root`. Absolute paths pass through.
fn paths_from_root(repo: &Path, root: &Path, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let base = std::fs::canonicalize(repo).unwrap_or_else(|_| repo.to_path_buf());
    let prefix = base.strip_prefix(root).ok().map(Path::to_path_buf);
    paths
        .into_iter()
        .map(|path| {
            if path.is_absolute() {
                return path;
            }
            match &prefix {
                Some(prefix) => prefix.join(path),
                None => base.join(path),
            }
        })
        .collect()
}

fn rejected(stage: CommitStage, error: AttributionError) -> AttributionError {
    let state = match &error {
        AttributionError::StagingFailed { .. }
        | AttributionError::SigningFailed { .. }
        | AttributionError::CommitFailed { .. } => Some(error.repo_state()),
        _ => None,
    };
    obs::emit_commit_rejected(stage.as_str(), state, &error);
    error
}
