//! Engine backed by the `git` command-line tool.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::VcsEngine;
use crate::error::{EngineError, EngineResult};
use crate::payload::RawCommit;

/// Drives the `git` binary, always with `-C <repo>` so no ambient working
/// directory leaks into an operation.
///
/// A git child is never killed when its future is dropped: it runs to
/// completion and releases `index.lock` itself.
#[derive(Debug, Clone)]
pub struct GitCliEngine {
    git: PathBuf,
}

impl Default for GitCliEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCliEngine {
    pub fn new() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable.
    pub fn with_binary(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    async fn output<I, S>(&self, repo: &Path, args: I, stdin: Option<&[u8]>) -> EngineResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        debug!(repo = %repo.display(), args = ?args, "running git");

        let mut child = Command::new(&self.git)
            .arg("-C")
            .arg(repo)
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        Ok(child.wait_with_output().await?)
    }

    /// Run git and return stdout, failing on a non-zero exit.
    async fn run<I, S>(&self, repo: &Path, args: I, stdin: Option<&[u8]>) -> EngineResult<Vec<u8>>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<OsStr>,
    {
        let output = self.output(repo, args.clone(), stdin).await?;
        if !output.status.success() {
            return Err(command_error(args, &output));
        }
        Ok(output.stdout)
    }

    async fn run_trimmed<I, S>(&self, repo: &Path, args: I) -> EngineResult<String>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<OsStr>,
    {
        let stdout = self.run(repo, args, None).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

fn command_error<I, S>(args: I, output: &Output) -> EngineError
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let rendered: Vec<String> = args
        .into_iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect();
    EngineError::Command {
        command: format!("git {}", rendered.join(" ")),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl VcsEngine for GitCliEngine {
    async fn repo_root(&self, path: &Path) -> EngineResult<PathBuf> {
        let root = self
            .run_trimmed(path, ["rev-parse", "--show-toplevel"])
            .await?;
        if root.is_empty() {
            // Bare repositories have no work tree.
            return Err(EngineError::Failed(format!(
                "no work tree at {}",
                path.display()
            )));
        }
        Ok(PathBuf::from(root))
    }

    async fn stage_files(&self, repo: &Path, paths: &[PathBuf]) -> EngineResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args: Vec<OsString> = vec!["add".into(), "--".into()];
        args.extend(paths.iter().map(|p| p.as_os_str().to_owned()));
        self.run(repo, &args, None).await?;
        Ok(())
    }

    async fn staged_tree(&self, repo: &Path) -> EngineResult<String> {
        self.run_trimmed(repo, ["write-tree"]).await
    }

    async fn tree_is_empty(&self, repo: &Path, tree: &str) -> EngineResult<bool> {
        let listing = self.run(repo, ["ls-tree", tree], None).await?;
        Ok(listing.is_empty())
    }

    async fn head(&self, repo: &Path) -> EngineResult<Option<String>> {
        let args = ["rev-parse", "--verify", "-q", "HEAD"];
        let output = self.output(repo, args, None).await?;
        if output.status.success() {
            return Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ));
        }
        // Exit code 1 with -q means "no such ref": an unborn branch.
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        Err(command_error(args, &output))
    }

    async fn write_commit(
        &self,
        repo: &Path,
        object: &[u8],
        expected_parent: Option<&str>,
    ) -> EngineResult<String> {
        let stdout = self
            .run(
                repo,
                ["hash-object", "-t", "commit", "-w", "--stdin"],
                Some(object),
            )
            .await?;
        let hash = String::from_utf8_lossy(&stdout).trim().to_string();

        // Empty old value means HEAD's branch must not exist yet.
        let old = expected_parent.unwrap_or("");
        self.run(
            repo,
            ["update-ref", "-m", "commit (agent-git)", "HEAD", hash.as_str(), old],
            None,
        )
        .await?;

        Ok(hash)
    }

    async fn read_commit(&self, repo: &Path, revision: &str) -> EngineResult<RawCommit> {
        if revision.is_empty() || revision.starts_with('-') {
            return Err(EngineError::RevisionNotFound(revision.to_string()));
        }

        let spec = format!("{revision}^{{commit}}");
        let args = ["rev-parse", "--verify", "-q", spec.as_str()];
        let output = self.output(repo, args, None).await?;
        if !output.status.success() {
            return Err(EngineError::RevisionNotFound(revision.to_string()));
        }
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let object = self.run(repo, ["cat-file", "commit", hash.as_str()], None).await?;
        RawCommit::parse(&hash, &object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn head_is_40_hex_chars() {
        let repo = make_git_repo();
        let head = GitCliEngine::new().head(repo.path()).await.unwrap().unwrap();
        assert_eq!(head.len(), 40, "SHA should be 40 hex chars, got: {head}");
        assert!(head.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn head_is_none_on_unborn_branch() {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q"]);
        assert!(GitCliEngine::new().head(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn head_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitCliEngine::new().head(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn repo_root_is_shared_by_subdirectories() {
        let repo = make_git_repo();
        let sub = repo.path().join("src").join("nested");
        std::fs::create_dir_all(&sub).unwrap();

        let engine = GitCliEngine::new();
        let top = engine.repo_root(repo.path()).await.unwrap();
        assert_eq!(engine.repo_root(&sub).await.unwrap(), top);
        assert_eq!(top, std::fs::canonicalize(repo.path()).unwrap());
    }

    #[tokio::test]
    async fn repo_root_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitCliEngine::new().repo_root(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn empty_tree_is_detected() {
        let repo = make_git_repo();
        let engine = GitCliEngine::new();
        let empty = engine.staged_tree(repo.path()).await.unwrap();
        assert!(engine.tree_is_empty(repo.path(), &empty).await.unwrap());

        std::fs::write(repo.path().join("a.txt"), "a").unwrap();
        engine
            .stage_files(repo.path(), &[PathBuf::from("a.txt")])
            .await
            .unwrap();
        let tree = engine.staged_tree(repo.path()).await.unwrap();
        assert!(!engine.tree_is_empty(repo.path(), &tree).await.unwrap());
    }

    #[tokio::test]
    async fn staging_missing_path_fails() {
        let repo = make_git_repo();
        let engine = GitCliEngine::new();
        let err = engine
            .stage_files(repo.path(), &[PathBuf::from("does-not-exist.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Command { .. }));
    }

    #[tokio::test]
    async fn read_commit_of_human_commit() {
        let repo = make_git_repo();
        let raw = GitCliEngine::new()
            .read_commit(repo.path(), "HEAD")
            .await
            .unwrap();
        assert!(raw.author.starts_with("test-user <test@example.com>"));
        assert_eq!(raw.message, "initial");
        assert!(raw.signature.is_none());
    }

    #[tokio::test]
    async fn read_commit_rejects_option_like_revisions() {
        let repo = make_git_repo();
        let engine = GitCliEngine::new();
        assert!(matches!(
            engine.read_commit(repo.path(), "--all").await,
            Err(EngineError::RevisionNotFound(_))
        ));
        assert!(matches!(
            engine.read_commit(repo.path(), "no-such-branch").await,
            Err(EngineError::RevisionNotFound(_))
        ));
    }
}
