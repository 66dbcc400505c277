//! Agent-Git Core: attributed, signed commits for automated agents
//!
//! Every commit an agent makes goes through [`AttributionGate`]: the message
//! gets the `[agent]` prefix, the author reads `<agent> on behalf of
//! <operator> <<email>>`, and the commit object carries an ed25519
//! signature from the agent's key. [`VerificationReader`] checks any commit
//! afterwards against the live key store or an exported [`PublicKeyring`].
//!
//! ## Key Components
//!
//! - `identity`: author and message formatting rules
//! - `signer`: signing, verification, signature armor
//! - `engine`: the `VcsEngine` seam (`GitCliEngine`, `fakes::MemoryEngine`)
//! - `gate` / `verify`: the commit and verification flows
//! - `service`: `AgentGit`, both flows over one key store
//!
//! [`PublicKeyring`]: agent_keyring::PublicKeyring

pub mod config;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod identity;
pub mod metrics;
pub mod obs;
pub mod payload;
pub mod service;
pub mod signer;
pub mod telemetry;
pub mod verify;

pub use config::AgentGitConfig;
pub use engine::{GitCliEngine, VcsEngine};
pub use error::{AttributionError, EngineError, FormatError, RepoState, Result};
pub use gate::{AttributionGate, CommitRequest, CommitStage, SignedCommitResult};
pub use identity::{
    format_author, format_message, parse_author, AgentIdentity, PartialIdentity, AGENT_PREFIX,
};
pub use metrics::METRICS;
pub use payload::{CommitPayload, RawCommit};
pub use service::AgentGit;
pub use signer::{CommitSigner, SignatureBlock, SigningError};
pub use telemetry::init_tracing;
pub use verify::{PublicKeySource, VerificationReader, VerificationResult};

pub use agent_keyring::{KeyId, KeyStore, KeyStoreError, PublicKeyring};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
