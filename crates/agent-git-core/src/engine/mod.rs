//! The version-control engine collaborator.
//!
//! Attribution never talks to git directly; it goes through [`VcsEngine`]
//! so the real CLI engine and the in-memory fake are interchangeable.
//! Every operation takes the repository path explicitly.

pub mod git;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::payload::RawCommit;

pub use git::GitCliEngine;

/// Operations the attribution subsystem needs from a version-control engine.
///
/// Guarantees:
/// - `stage_files` is all-or-nothing: on error the index is unchanged.
/// - `write_commit` stores the object and advances HEAD in one step, and
///   only if HEAD still equals `expected_parent`.
/// - Dropping an operation's future never leaves the repository locked.
#[async_trait]
pub trait VcsEngine: Send + Sync {
    /// Top-level directory of the repository containing `path`. Every path
    /// inside one repository resolves to the same root.
    async fn repo_root(&self, path: &Path) -> EngineResult<PathBuf>;

    /// Stage `paths`. An empty slice keeps the current staged set.
    async fn stage_files(&self, repo: &Path, paths: &[PathBuf]) -> EngineResult<()>;

    /// Tree id of the current index.
    async fn staged_tree(&self, repo: &Path) -> EngineResult<String>;

    /// Whether `tree` has no entries.
    async fn tree_is_empty(&self, repo: &Path, tree: &str) -> EngineResult<bool>;

    /// Commit HEAD points to, or `None` on an unborn branch.
    async fn head(&self, repo: &Path) -> EngineResult<Option<String>>;

    /// Record a fully assembled (already signed) commit object and move
    /// HEAD to it. Returns the new commit hash.
    async fn write_commit(
        &self,
        repo: &Path,
        object: &[u8],
        expected_parent: Option<&str>,
    ) -> EngineResult<String>;

    /// Resolve `revision` and return the raw commit.
    async fn read_commit(&self, repo: &Path, revision: &str) -> EngineResult<RawCommit>;
}
