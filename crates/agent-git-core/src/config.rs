//! Process-wide defaults, read once at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::identity::PartialIdentity;

pub const AGENT_NAME_ENV: &str = "AGENT_GIT_AGENT_NAME";
pub const OPERATOR_NAME_ENV: &str = "AGENT_GIT_OPERATOR_NAME";
pub const OPERATOR_EMAIL_ENV: &str = "AGENT_GIT_OPERATOR_EMAIL";
pub const KEY_STORE_ENV: &str = "AGENT_GIT_KEYSTORE";

/// Agent name used when neither the call nor the environment names one.
pub const DEFAULT_AGENT_NAME: &str = "Claude";

/// Defaults applied to every commit of this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentGitConfig {
    pub agent_name: String,
    pub operator_name: Option<String>,
    pub operator_email: Option<String>,
    /// Directory holding the key store.
    pub key_store_path: PathBuf,
}

impl Default for AgentGitConfig {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            operator_name: None,
            operator_email: None,
            key_store_path: default_key_store_path(),
        }
    }
}

impl AgentGitConfig {
    /// Read the configuration from `AGENT_GIT_*` variables. Empty values
    /// count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            agent_name: get(AGENT_NAME_ENV).unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            operator_name: get(OPERATOR_NAME_ENV),
            operator_email: get(OPERATOR_EMAIL_ENV),
            key_store_path: get(KEY_STORE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(default_key_store_path),
        }
    }

    /// The identity fields used when a request leaves them out.
    pub fn default_identity(&self) -> PartialIdentity {
        PartialIdentity {
            agent_name: Some(self.agent_name.clone()),
            operator_name: self.operator_name.clone(),
            operator_email: self.operator_email.clone(),
        }
    }
}

/// `~/.agent-git`, or a directory under the system temp dir when there is
/// no home directory.
pub fn default_key_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agent-git")
}
