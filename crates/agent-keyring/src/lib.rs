//! Agent-Keyring: signing key lifecycle for agent-git
//!
//! This crate owns the agent's signing identity. It generates ed25519 keys
//! on first use, persists them through a pluggable backend, rotates them,
//! and keeps every retired key's public half so old commits stay
//! verifiable.
//!
//! ## Layer 0 - Key Persistence
//!
//! Focus: a single active key under concurrency, atomic writes, private
//! material that never leaves [`AgentKey`].
//!
//! ## Key Components
//!
//! - `KeyStore`: active-key accessor, rotation, public lookups
//! - `KeyBackend`: get/put/list storage seam (`FsKeyBackend`, `MemoryKeyBackend`)
//! - `PublicKeyring`: exported public material, the verifier's trust anchor

mod backend;
mod error;
pub mod fakes;
mod fs;
mod key;
mod record;
mod store;

pub use backend::{KeyBackend, KeyResult};
pub use error::KeyStoreError;
pub use fs::FsKeyBackend;
pub use key::AgentKey;
pub use record::{KeyId, KeyRecord, PublicKeyRecord, PublicKeyring, ALGORITHM};
pub use store::KeyStore;
