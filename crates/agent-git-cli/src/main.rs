//! agent-git: attributed, signed commits for AI agents
//!
//! ## Commands
//!
//! - `commit`: stage files and record a signed `[agent]` commit
//! - `verify`: check whether a commit is agent-authored and validly signed
//! - `key`: show, list, rotate or export the signing keys

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use agent_git_core::{
    AgentGit, AgentGitConfig, CommitRequest, GitCliEngine, PublicKeyring, VerificationReader,
    VerificationResult, METRICS,
};
use agent_keyring::PublicKeyRecord;

#[derive(Parser)]
#[command(name = "agent-git")]
#[command(version = agent_git_core::VERSION)]
#[command(about = "Attributed, signed git commits for AI agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON (log lines on stderr, results on stdout)
    #[arg(long, global = true)]
    json: bool,

    /// Agent name used when a commit does not name one
    #[arg(long, global = true, env = "AGENT_GIT_AGENT_NAME")]
    agent_name: Option<String>,

    /// Operator on whose behalf the agent commits
    #[arg(long, global = true, env = "AGENT_GIT_OPERATOR_NAME")]
    operator_name: Option<String>,

    /// Operator email
    #[arg(long, global = true, env = "AGENT_GIT_OPERATOR_EMAIL")]
    operator_email: Option<String>,

    /// Key store directory (default: ~/.agent-git)
    #[arg(long, global = true, env = "AGENT_GIT_KEYSTORE")]
    key_store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage files and record a signed agent commit
    Commit {
        /// Commit message; "[agent] " is prepended if missing
        message: String,

        /// Repository to commit in
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,

        /// Files to stage (default: commit what is already staged)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// Check the attribution of a commit
    Verify {
        /// Revision to check
        #[arg(default_value = "HEAD")]
        revision: String,

        /// Repository to read from
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,

        /// Verify against an exported public keyring instead of the key store
        #[arg(long)]
        keyring: Option<PathBuf>,

        /// Exit with an error unless the commit is agent-authored and valid
        #[arg(long)]
        strict: bool,
    },

    /// Manage signing keys
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Show the active key, generating one on first use
    Show,
    /// List every retained key, newest first
    List,
    /// Retire the active key and generate a new one
    Rotate,
    /// Export the public keyring (the verifier's trust anchor)
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    agent_git_core::init_tracing(cli.json, level);

    let config = config_from_cli(&cli);
    let result = run(cli, &config).await;
    METRICS.flush();
    result
}

fn config_from_cli(cli: &Cli) -> AgentGitConfig {
    let mut config = AgentGitConfig::from_env();
    if let Some(name) = cli.agent_name.clone().filter(|v| !v.trim().is_empty()) {
        config.agent_name = name;
    }
    if cli.operator_name.is_some() {
        config.operator_name = cli.operator_name.clone();
    }
    if cli.operator_email.is_some() {
        config.operator_email = cli.operator_email.clone();
    }
    if let Some(path) = &cli.key_store {
        config.key_store_path = path.clone();
    }
    config
}

async fn run(cli: Cli, config: &AgentGitConfig) -> Result<()> {
    match cli.command {
        Commands::Commit {
            message,
            repo,
            files,
        } => cmd_commit(&open_service(config)?, &repo, &message, files, cli.json).await,
        Commands::Verify {
            revision,
            repo,
            keyring,
            strict,
        } => cmd_verify(config, &repo, &revision, keyring.as_deref(), strict, cli.json).await,
        Commands::Key { action } => {
            let svc = open_service(config)?;
            match action {
                KeyAction::Show => cmd_key_show(&svc, cli.json),
                KeyAction::List => cmd_key_list(&svc, cli.json),
                KeyAction::Rotate => cmd_key_rotate(&svc, cli.json),
                KeyAction::Export { output } => cmd_key_export(&svc, output.as_deref()),
            }
        }
    }
}

/// Open the key store. Creates it on first use.
fn open_service(config: &AgentGitConfig) -> Result<AgentGit> {
    AgentGit::from_config(config).with_context(|| {
        format!(
            "Failed to open key store at {}",
            config.key_store_path.display()
        )
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_commit(
    svc: &AgentGit,
    repo: &Path,
    message: &str,
    files: Vec<PathBuf>,
    json: bool,
) -> Result<()> {
    let request = CommitRequest::new(repo, message).files(files);
    let result = svc.commit(request).await.context("Commit failed")?;

    if json {
        return print_json(&result);
    }
    println!("{}", result.confirmation);
    Ok(())
}

/// With `keyring`, verification never touches the local key store.
async fn cmd_verify(
    config: &AgentGitConfig,
    repo: &Path,
    revision: &str,
    keyring: Option<&Path>,
    strict: bool,
    json: bool,
) -> Result<()> {
    let result = match keyring {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read keyring {}", path.display()))?;
            let ring = PublicKeyring::from_json(&text)
                .with_context(|| format!("Invalid keyring {}", path.display()))?;
            info!(keys = ring.keys.len(), "verifying against exported keyring");
            VerificationReader::new(Arc::new(GitCliEngine::new()), Arc::new(ring))
                .verify(repo, revision)
                .await
        }
        None => {
            open_service(config)?
                .verify_attribution(repo, revision)
                .await
        }
    };

    if json {
        print_json(&result)?;
    } else {
        print_verification(revision, &result);
    }

    if strict && !result.is_attributed() {
        bail!("{revision} is not an attributed agent commit");
    }
    Ok(())
}

fn print_verification(revision: &str, result: &VerificationResult) {
    match &result.commit_hash {
        Some(hash) => println!("commit {hash}"),
        None => {
            println!("{revision}: not found");
            return;
        }
    }
    match &result.identity {
        Some(identity) => println!(
            "Agent:     {} on behalf of {} <{}>",
            identity.agent_name, identity.operator_name, identity.operator_email
        ),
        None => println!("Agent:     no (not an agent commit)"),
    }
    let status = if result.signature_valid {
        "valid"
    } else {
        "INVALID"
    };
    println!("Signature: {status}");
    if let Some(key_id) = &result.key_id {
        println!("Key:       {key_id}");
    }
}

fn print_key(record: &PublicKeyRecord, active: bool) {
    let marker = if active { "*" } else { " " };
    println!(
        "{marker} {}  gen {:<3} {}  {}",
        record.key_id,
        record.generation,
        record.algorithm,
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn cmd_key_show(svc: &AgentGit, json: bool) -> Result<()> {
    let key = svc.active_key().context("Failed to load the active key")?;
    let records = svc.keys()?;
    let record = records
        .iter()
        .find(|r| r.key_id == *key.key_id())
        .context("Active key missing from the key store")?;

    if json {
        return print_json(record);
    }
    println!("Key-Id:     {}", record.key_id);
    println!("Generation: {}", record.generation);
    println!("Algorithm:  {}", record.algorithm);
    println!("Public key: {}", record.public_key);
    println!(
        "Created:    {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

fn cmd_key_list(svc: &AgentGit, json: bool) -> Result<()> {
    let records = svc.keys().context("Failed to list keys")?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No keys yet. The first commit (or `agent-git key show`) creates one.");
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        print_key(record, i == 0);
    }
    Ok(())
}

fn cmd_key_rotate(svc: &AgentGit, json: bool) -> Result<()> {
    let key = svc.rotate_key().context("Key rotation failed")?;
    if json {
        return print_json(&serde_json::json!({
            "key_id": key.key_id(),
            "generation": key.generation(),
        }));
    }
    println!(
        "Rotated: new active key {} (generation {})",
        key.key_id(),
        key.generation()
    );
    Ok(())
}

fn cmd_key_export(svc: &AgentGit, output: Option<&Path>) -> Result<()> {
    let ring = svc
        .export_public_keyring()
        .context("Failed to export the public keyring")?;
    let text = ring.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, format!("{text}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} key(s) to {}", ring.keys.len(), path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}
