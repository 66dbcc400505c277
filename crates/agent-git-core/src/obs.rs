//! Structured observability hooks for the attribution lifecycle.
//!
//! This module provides:
//! - A commit-scoped tracing span via [`commit_span`]
//! - Emission functions for commit stages, rejections and verifications
//!
//! Events are emitted at `info!` level (configurable via `AGENT_GIT_LOG`).
//! Key lifecycle events (`key.generated`, `key.rotated`) come from
//! `agent-keyring`.

use std::path::Path;

use tracing::{info, warn};

use crate::error::RepoState;

/// Span tagging every event of one commit with its repository.
///
/// Attach it with [`tracing::Instrument`] so it follows the commit future
/// across await points.
///
/// # Example
///
/// ```ignore
/// gate.run(request).instrument(commit_span(Path::new("/work/repo"))).await;
/// ```
pub fn commit_span(repo: &Path) -> tracing::Span {
    tracing::info_span!("agent_git.commit", repo = %repo.display())
}

/// Emit event: the commit advanced to `stage`.
pub fn emit_commit_stage(stage: &str) {
    info!(event = "commit.stage", stage = %stage);
}

/// Emit event: signed commit recorded.
pub fn emit_commit_signed(commit_hash: &str, key_id: &str, author: &str) {
    info!(
        event = "commit.signed",
        commit = %commit_hash,
        key_id = %key_id,
        author = %author,
    );
}

/// Emit event: commit refused or failed (warning level).
pub fn emit_commit_rejected(stage: &str, state: Option<RepoState>, error: &dyn std::fmt::Display) {
    match state {
        Some(state) => warn!(
            event = "commit.rejected",
            stage = %stage,
            repo_state = %state,
            error = %error,
        ),
        None => warn!(event = "commit.rejected", stage = %stage, error = %error),
    }
}

/// Emit event: attribution check finished.
pub fn emit_verify_completed(
    revision: &str,
    is_agent_authored: bool,
    signature_valid: bool,
    key_id: Option<&str>,
) {
    info!(
        event = "verify.completed",
        revision = %revision,
        is_agent_authored = is_agent_authored,
        signature_valid = signature_valid,
        key_id = key_id.unwrap_or("-"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_span_enter() {
        let _entered = commit_span(Path::new("/tmp/repo")).entered();
        emit_commit_stage("validated");
    }
}
