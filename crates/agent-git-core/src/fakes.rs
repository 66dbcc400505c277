//! In-memory fakes for the engine trait (testing only)
//!
//! `MemoryEngine` models just enough of a repository for attribution: a
//! working tree, an index, content-addressed trees and commit objects, and
//! HEAD. Faults can be injected to exercise every failure path of a commit.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::engine::VcsEngine;
use crate::error::{EngineError, EngineResult};
use crate::payload::RawCommit;

#[derive(Debug, Default)]
struct MemoryRepo {
    working: BTreeMap<PathBuf, Vec<u8>>,
    index: BTreeMap<PathBuf, String>,
    trees: HashMap<String, BTreeMap<PathBuf, String>>,
    objects: HashMap<String, Vec<u8>>,
    head: Option<String>,
}

fn digest_hex(data: &[u8]) -> String {
    // Truncate to 40 chars so ids look like git's SHA-1 object names.
    hex::encode(Sha256::digest(data))[..40].to_string()
}

/// In-memory engine keyed by repository path.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    repos: Mutex<HashMap<PathBuf, MemoryRepo>>,
    fail_next_stage: AtomicBool,
    fail_next_write: AtomicBool,
    stage_delay: Mutex<Option<Duration>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository with an unborn HEAD.
    pub fn init_repo(&self, repo: impl AsRef<Path>) {
        self.repos()
            .entry(repo.as_ref().to_path_buf())
            .or_default();
    }

    /// Write a file into the working tree.
    pub fn write_file(&self, repo: impl AsRef<Path>, path: impl AsRef<Path>, content: &[u8]) {
        self.repos()
            .entry(repo.as_ref().to_path_buf())
            .or_default()
            .working
            .insert(path.as_ref().to_path_buf(), content.to_vec());
    }

    /// Paths currently in the index.
    pub fn staged_paths(&self, repo: impl AsRef<Path>) -> Vec<PathBuf> {
        self.repos()
            .get(repo.as_ref())
            .map(|r| r.index.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Commit HEAD points to.
    pub fn head_of(&self, repo: impl AsRef<Path>) -> Option<String> {
        self.repos().get(repo.as_ref()).and_then(|r| r.head.clone())
    }

    /// Paths recorded in the tree of `commit`.
    pub fn commit_paths(&self, repo: impl AsRef<Path>, commit: &str) -> Vec<PathBuf> {
        let repos = self.repos();
        let Some(r) = repos.get(repo.as_ref()) else {
            return Vec::new();
        };
        r.objects
            .get(commit)
            .and_then(|object| RawCommit::parse(commit, object).ok())
            .and_then(|raw| r.trees.get(&raw.tree))
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Parent hashes of `commit`.
    pub fn parents_of(&self, repo: impl AsRef<Path>, commit: &str) -> Vec<String> {
        let repos = self.repos();
        repos
            .get(repo.as_ref())
            .and_then(|r| r.objects.get(commit))
            .map(|object| {
                String::from_utf8_lossy(object)
                    .lines()
                    .take_while(|l| !l.is_empty())
                    .filter_map(|l| l.strip_prefix("parent ").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store an arbitrary commit object and point HEAD at it, bypassing
    /// every check. Stands in for commits made by humans or forgers.
    pub fn insert_raw_commit(&self, repo: impl AsRef<Path>, object: &[u8]) -> String {
        let hash = digest_hex(object);
        let mut repos = self.repos();
        let r = repos.entry(repo.as_ref().to_path_buf()).or_default();
        r.objects.insert(hash.clone(), object.to_vec());
        r.head = Some(hash.clone());
        hash
    }

    /// Raw bytes of a stored commit.
    pub fn raw_object(&self, repo: impl AsRef<Path>, commit: &str) -> Option<Vec<u8>> {
        self.repos()
            .get(repo.as_ref())
            .and_then(|r| r.objects.get(commit).cloned())
    }

    /// Make the next `stage_files` call fail without touching the index.
    pub fn fail_next_stage(&self) {
        self.fail_next_stage.store(true, Ordering::SeqCst);
    }

    /// Make the next `write_commit` call fail without storing anything.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Sleep this long after staging, widening the window in which
    /// unserialized commits would interleave.
    pub fn set_stage_delay(&self, delay: Duration) {
        *self
            .stage_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delay);
    }

    fn repos(&self) -> MutexGuard<'_, HashMap<PathBuf, MemoryRepo>> {
        self.repos
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stage_delay(&self) -> Option<Duration> {
        *self
            .stage_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_a_repo(repo: &Path) -> EngineError {
    EngineError::Failed(format!("not a repository: {}", repo.display()))
}

#[async_trait]
impl VcsEngine for MemoryEngine {
    async fn repo_root(&self, path: &Path) -> EngineResult<PathBuf> {
        // Nested repositories resolve to the innermost one.
        self.repos()
            .keys()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .cloned()
            .ok_or_else(|| not_a_repo(path))
    }

    async fn stage_files(&self, repo: &Path, paths: &[PathBuf]) -> EngineResult<()> {
        if self.fail_next_stage.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Failed("injected staging failure".to_string()));
        }
        {
            let mut repos = self.repos();
            let r = repos.get_mut(repo).ok_or_else(|| not_a_repo(repo))?;

            let mut staged = Vec::with_capacity(paths.len());
            for path in paths {
                let content = r.working.get(path).ok_or_else(|| {
                    EngineError::Failed(format!(
                        "pathspec '{}' did not match any files",
                        path.display()
                    ))
                })?;
                staged.push((path.clone(), digest_hex(content)));
            }
            r.index.extend(staged);
        }

        if let Some(delay) = self.stage_delay() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn staged_tree(&self, repo: &Path) -> EngineResult<String> {
        let mut repos = self.repos();
        let r = repos.get_mut(repo).ok_or_else(|| not_a_repo(repo))?;

        let listing: String = r
            .index
            .iter()
            .map(|(path, blob)| format!("{blob} {}\n", path.display()))
            .collect();
        let tree = digest_hex(listing.as_bytes());
        r.trees.insert(tree.clone(), r.index.clone());
        Ok(tree)
    }

    async fn tree_is_empty(&self, repo: &Path, tree: &str) -> EngineResult<bool> {
        let repos = self.repos();
        let r = repos.get(repo).ok_or_else(|| not_a_repo(repo))?;
        r.trees
            .get(tree)
            .map(BTreeMap::is_empty)
            .ok_or_else(|| EngineError::RevisionNotFound(tree.to_string()))
    }

    async fn head(&self, repo: &Path) -> EngineResult<Option<String>> {
        let repos = self.repos();
        let r = repos.get(repo).ok_or_else(|| not_a_repo(repo))?;
        Ok(r.head.clone())
    }

    async fn write_commit(
        &self,
        repo: &Path,
        object: &[u8],
        expected_parent: Option<&str>,
    ) -> EngineResult<String> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Failed("injected write failure".to_string()));
        }

        let mut repos = self.repos();
        let r = repos.get_mut(repo).ok_or_else(|| not_a_repo(repo))?;
        if r.head.as_deref() != expected_parent {
            return Err(EngineError::HeadMoved {
                expected: expected_parent.unwrap_or("<unborn>").to_string(),
                actual: r.head.clone().unwrap_or_else(|| "<unborn>".to_string()),
            });
        }

        let hash = digest_hex(object);
        r.objects.insert(hash.clone(), object.to_vec());
        r.head = Some(hash.clone());
        Ok(hash)
    }

    async fn read_commit(&self, repo: &Path, revision: &str) -> EngineResult<RawCommit> {
        let repos = self.repos();
        let r = repos.get(repo).ok_or_else(|| not_a_repo(repo))?;

        let resolved = if revision == "HEAD" {
            r.head.clone()
        } else if revision.len() >= 4 {
            // Abbreviated hashes must be unambiguous.
            let mut matches = r.objects.keys().filter(|h| h.starts_with(revision));
            match (matches.next(), matches.next()) {
                (Some(h), None) => Some(h.clone()),
                _ => None,
            }
        } else {
            None
        };
        let hash =
            resolved.ok_or_else(|| EngineError::RevisionNotFound(revision.to_string()))?;

        let object = r
            .objects
            .get(&hash)
            .ok_or_else(|| EngineError::RevisionNotFound(revision.to_string()))?;
        RawCommit::parse(&hash, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "/repos/demo";

    #[tokio::test]
    async fn staging_is_all_or_nothing() {
        let engine = MemoryEngine::new();
        engine.write_file(REPO, "a.txt", b"a");

        let err = engine
            .stage_files(
                Path::new(REPO),
                &[PathBuf::from("a.txt"), PathBuf::from("missing.txt")],
            )
            .await;
        assert!(err.is_err());
        assert!(engine.staged_paths(REPO).is_empty());
    }

    #[tokio::test]
    async fn write_commit_checks_expected_parent() {
        let engine = MemoryEngine::new();
        engine.init_repo(REPO);
        let first = engine
            .write_commit(Path::new(REPO), b"tree t\n\nfirst\n", None)
            .await
            .unwrap();

        let stale = engine
            .write_commit(Path::new(REPO), b"tree t\n\nsecond\n", None)
            .await;
        assert!(matches!(stale, Err(EngineError::HeadMoved { .. })));
        assert_eq!(engine.head_of(REPO).as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn read_commit_resolves_prefix() {
        let engine = MemoryEngine::new();
        let hash = engine.insert_raw_commit(
            REPO,
            b"tree t\nauthor A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nhello\n",
        );
        let raw = engine
            .read_commit(Path::new(REPO), &hash[..8])
            .await
            .unwrap();
        assert_eq!(raw.hash, hash);
        assert_eq!(raw.message, "hello");
    }

    #[tokio::test]
    async fn repo_root_finds_enclosing_repo() {
        let engine = MemoryEngine::new();
        engine.init_repo(REPO);
        engine.init_repo("/repos/demo/vendor/lib");

        let root = engine.repo_root(Path::new("/repos/demo/src")).await.unwrap();
        assert_eq!(root, PathBuf::from(REPO));
        let nested = engine
            .repo_root(Path::new("/repos/demo/vendor/lib/src"))
            .await
            .unwrap();
        assert_eq!(nested, PathBuf::from("/repos/demo/vendor/lib"));
        assert!(engine.repo_root(Path::new("/repos/demolition")).await.is_err());
    }

    #[tokio::test]
    async fn unknown_repo_fails() {
        let engine = MemoryEngine::new();
        assert!(engine.head(Path::new("/nowhere")).await.is_err());
    }
}
