//! stackup configuration
//!
//! Where the control plane lives, how hard to retry, and where state and run
//! journals go. Loaded from TOML; defaults apply when no file exists.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stackup_provider::{ProviderContext, RetryPolicy};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StackupConfig {
    pub provider: ProviderConfig,
    /// Account values used to derive identifiers and outputs.
    pub context: ProviderContext,
    pub retry: RetryPolicy,
    pub state: StateConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Control-plane base URL. Unset runs against the in-process backend.
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    /// Holds `state.yaml` and `runs/`.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    /// Container tool used to tag and push, e.g. docker or podman.
    pub program: String,
}

impl Default for StackupConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            context: ProviderContext::default(),
            retry: RetryPolicy::default(),
            state: StateConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: "STACKUP_TOKEN".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".stackup"),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            program: "docker".into(),
        }
    }
}

impl StackupConfig {
    /// Load from a TOML file. A missing file gives defaults; an unreadable
    /// or malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading config {}", path.display()))
            }
        };
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Current config as TOML, for generating a starting file.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Bearer token from the configured environment variable, if set.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.provider.token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }

    pub fn state_file(&self) -> PathBuf {
        self.state.dir.join("state.yaml")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state.dir.join("runs")
    }
}
