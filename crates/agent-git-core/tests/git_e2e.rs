//! The full flow against real git repositories.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use agent_git_core::{
    AgentGit, AgentGitConfig, AttributionError, CommitRequest, GitCliEngine, KeyStore,
    PartialIdentity, RepoState,
};

fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.name", "test-user"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

fn service(keys_dir: &Path) -> AgentGit {
    let config = AgentGitConfig {
        operator_name: Some("Andor".to_string()),
        operator_email: Some("andor@andor.us".to_string()),
        key_store_path: keys_dir.to_path_buf(),
        ..AgentGitConfig::default()
    };
    AgentGit::from_config(&config).unwrap()
}

#[tokio::test]
async fn commit_then_verify_with_git() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();
    let svc = service(keys.path());

    std::fs::write(repo.path().join("README.md"), "# demo\n").unwrap();
    let result = svc
        .commit(CommitRequest::new(repo.path(), "Update README.md").files(["README.md"]))
        .await
        .unwrap();

    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), result.commit_hash);
    assert_eq!(
        git(repo.path(), &["log", "-1", "--format=%an <%ae>"]),
        "Claude on behalf of Andor <andor@andor.us>"
    );
    assert_eq!(
        git(repo.path(), &["log", "-1", "--format=%s"]),
        "[agent] Update README.md"
    );
    assert_eq!(
        git(repo.path(), &["show", "--name-only", "--format=", "HEAD"]),
        "README.md"
    );
    // git itself recognises the header and parses the object cleanly.
    git(repo.path(), &["fsck", "--no-progress"]);

    let verified = svc.verify_attribution(repo.path(), "HEAD").await;
    assert!(verified.is_agent_authored);
    assert!(verified.signature_valid);
    assert_eq!(verified.key_id, Some(result.key_id));
}

#[tokio::test]
async fn second_commit_has_parent_and_key_survives_restart() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();

    std::fs::write(repo.path().join("a.txt"), "a").unwrap();
    let first = service(keys.path())
        .commit(CommitRequest::new(repo.path(), "add a").files(["a.txt"]))
        .await
        .unwrap();

    std::fs::write(repo.path().join("b.txt"), "b").unwrap();
    let svc = service(keys.path());
    let second = svc
        .commit(CommitRequest::new(repo.path(), "add b").files(["b.txt"]))
        .await
        .unwrap();

    assert_eq!(first.key_id, second.key_id);
    assert_eq!(
        git(repo.path(), &["rev-parse", "HEAD^"]),
        first.commit_hash
    );
    assert!(svc
        .verify_attribution(repo.path(), &first.commit_hash)
        .await
        .signature_valid);
}

#[tokio::test]
async fn rotation_keeps_history_verifiable() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();
    let svc = service(keys.path());

    std::fs::write(repo.path().join("a.txt"), "a").unwrap();
    let before = svc
        .commit(CommitRequest::new(repo.path(), "add a").files(["a.txt"]))
        .await
        .unwrap();

    svc.rotate_key().unwrap();

    std::fs::write(repo.path().join("b.txt"), "b").unwrap();
    let after = svc
        .commit(CommitRequest::new(repo.path(), "add b").files(["b.txt"]))
        .await
        .unwrap();
    assert_ne!(before.key_id, after.key_id);

    for (commit, key) in [(&before, &before.key_id), (&after, &after.key_id)] {
        let result = svc.verify_attribution(repo.path(), &commit.commit_hash).await;
        assert!(result.signature_valid);
        assert_eq!(result.key_id.as_ref(), Some(key));
    }
}

#[tokio::test]
async fn human_commit_is_not_agent_authored() {
    let repo = make_git_repo();
    git(repo.path(), &["commit", "-q", "--allow-empty", "-m", "by hand"]);
    let keys = tempfile::tempdir().unwrap();

    let result = service(keys.path())
        .verify_attribution(repo.path(), "HEAD")
        .await;
    assert!(!result.is_agent_authored);
    assert!(!result.signature_valid);
}

#[tokio::test]
async fn amended_agent_commit_fails_verification() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();
    let svc = service(keys.path());

    std::fs::write(repo.path().join("a.txt"), "a").unwrap();
    svc.commit(CommitRequest::new(repo.path(), "add a").files(["a.txt"]))
        .await
        .unwrap();

    // Rewrite the object with a different message but the same headers.
    let object = git(repo.path(), &["cat-file", "commit", "HEAD"]);
    let forged = object.replace("[agent] add a", "[agent] add nothing");
    let mut child = Command::new("git")
        .args(["hash-object", "-t", "commit", "-w", "--stdin"])
        .current_dir(repo.path())
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .unwrap();
    {
        use std::io::Write;
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(forged.as_bytes()).unwrap();
        stdin.write_all(b"\n").unwrap();
    }
    let output = child.wait_with_output().unwrap();
    let forged_hash = String::from_utf8(output.stdout).unwrap().trim().to_string();

    let result = svc.verify_attribution(repo.path(), &forged_hash).await;
    assert!(result.is_agent_authored);
    assert!(!result.signature_valid);
}

#[tokio::test]
async fn staging_unknown_path_leaves_repo_unchanged() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();
    let svc = service(keys.path());

    let err = svc
        .commit(CommitRequest::new(repo.path(), "add ghost").files(["ghost.txt"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AttributionError::StagingFailed {
            state: RepoState::Unchanged,
            ..
        }
    ));
    assert_eq!(git(repo.path(), &["status", "--porcelain"]), "");
}

#[tokio::test]
async fn moved_head_fails_commit_without_clobbering() {
    let repo = make_git_repo();
    git(repo.path(), &["commit", "-q", "--allow-empty", "-m", "base"]);
    let keys = tempfile::tempdir().unwrap();
    let engine = Arc::new(GitCliEngine::new());

    let object = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
author A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nstale\n";
    let err = agent_git_core::VcsEngine::write_commit(
        engine.as_ref(),
        repo.path(),
        object,
        Some("1111111111111111111111111111111111111111"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, agent_git_core::EngineError::Command { .. }));
    assert_eq!(git(repo.path(), &["log", "-1", "--format=%s"]), "base");

    // A service over the same repository still commits normally.
    let svc = AgentGit::new(
        Arc::new(KeyStore::open(keys.path()).unwrap()),
        engine,
        PartialIdentity {
            agent_name: Some("Claude".to_string()),
            operator_name: Some("Andor".to_string()),
            operator_email: Some("andor@andor.us".to_string()),
        },
    );
    std::fs::write(repo.path().join("a.txt"), "a").unwrap();
    svc.commit(CommitRequest::new(repo.path(), "add a").files(["a.txt"]))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commits_through_a_subdirectory_do_not_interleave() {
    let repo = make_git_repo();
    git(repo.path(), &["commit", "-q", "--allow-empty", "-m", "base"]);
    let sub = repo.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    let keys = tempfile::tempdir().unwrap();
    let svc = Arc::new(service(keys.path()));

    let mut own_file = Vec::new();
    for round in 0..4 {
        let top = format!("top-{round}.txt");
        let nested = format!("nested-{round}.txt");
        std::fs::write(repo.path().join(&top), "top").unwrap();
        std::fs::write(sub.join(&nested), "nested").unwrap();

        let jobs = [
            (repo.path().to_path_buf(), top.clone(), top),
            (sub.clone(), nested.clone(), format!("sub/{nested}")),
        ];
        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|(dir, file, in_tree)| {
                let svc = Arc::clone(&svc);
                tokio::spawn(async move {
                    let result = svc
                        .commit(CommitRequest::new(dir, format!("add {file}")).files([file]))
                        .await
                        .unwrap();
                    (result.commit_hash, in_tree)
                })
            })
            .collect();
        for task in tasks {
            own_file.push(task.await.unwrap());
        }
    }

    for (commit, file) in &own_file {
        let changed = git(
            repo.path(),
            &["diff-tree", "--no-commit-id", "--name-only", "-r", commit.as_str()],
        );
        assert_eq!(&changed, file, "commit {commit} recorded the wrong paths");
    }
    assert_eq!(
        git(repo.path(), &["rev-list", "--count", "HEAD"]),
        (own_file.len() + 1).to_string()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_commit_does_not_leave_index_locked() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();
    let svc = service(keys.path());

    // Incompressible data keeps `git add` busy well past the timeout.
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut big = Vec::with_capacity(32 << 20);
    while big.len() < 32 << 20 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        big.extend_from_slice(&state.to_le_bytes());
    }
    std::fs::write(repo.path().join("big.bin"), &big).unwrap();

    let slow = svc.commit(CommitRequest::new(repo.path(), "add big").files(["big.bin"]));
    let _ = tokio::time::timeout(std::time::Duration::from_millis(20), slow).await;

    std::fs::write(repo.path().join("small.txt"), "small").unwrap();
    svc.commit(CommitRequest::new(repo.path(), "add small").files(["small.txt"]))
        .await
        .unwrap();

    assert!(!repo.path().join(".git").join("index.lock").exists());
    assert_eq!(
        git(repo.path(), &["log", "-1", "--format=%s"]),
        "[agent] add small"
    );
    git(repo.path(), &["fsck", "--no-progress"]);
}

#[tokio::test]
async fn nothing_to_commit_leaves_head_alone() {
    let repo = make_git_repo();
    let keys = tempfile::tempdir().unwrap();
    let svc = service(keys.path());

    let err = svc
        .commit(CommitRequest::new(repo.path(), "empty"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AttributionError::CommitFailed {
            state: RepoState::Unchanged,
            ..
        }
    ));

    std::fs::write(repo.path().join("a.txt"), "a").unwrap();
    let first = svc
        .commit(CommitRequest::new(repo.path(), "add a").files(["a.txt"]))
        .await
        .unwrap();

    let err = svc
        .commit(CommitRequest::new(repo.path(), "add a again").files(["a.txt"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nothing to commit"));
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), first.commit_hash);
}
