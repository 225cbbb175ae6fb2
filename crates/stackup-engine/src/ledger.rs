//! State ledger - the engine's record of what it manages.
//!
//! Only the convergence engine mutates the ledger. Everyone else gets clones.

use crate::error::{DeployError, DeployResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackup_core::{Attributes, ResourceId};
use stackup_provider::RemoteObject;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    /// A mutating call is in flight.
    Creating,
    Created,
    Failed,
    Destroyed,
}

impl ResourceStatus {
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Pending, Creating)
                | (Pending, Created)
                | (Pending, Failed)
                | (Pending, Destroyed)
                | (Creating, Created)
                | (Creating, Failed)
                | (Created, Destroyed)
        )
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Failed => write!(f, "failed"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResourceState {
    pub status: ResourceStatus,
    /// Remote-assigned identifier, kept across runs.
    pub identifier: Option<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Attributes as last applied.
    #[serde(default)]
    pub attributes: Attributes,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// A create was issued and not yet torn down. Set even if the create
    /// failed, since the call may have taken effect remotely.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create_attempted: bool,
}

impl ResourceState {
    fn pending() -> Self {
        Self {
            status: ResourceStatus::Pending,
            identifier: None,
            outputs: BTreeMap::new(),
            attributes: Attributes::new(),
            updated: Utc::now(),
            last_error: None,
            create_attempted: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StateLedger {
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceState>,
}

impl StateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    pub fn status(&self, id: &ResourceId) -> Option<ResourceStatus> {
        self.resources.get(id).map(|s| s.status)
    }

    pub fn identifier(&self, id: &ResourceId) -> Option<&str> {
        self.resources.get(id).and_then(|s| s.identifier.as_deref())
    }

    pub fn outputs(&self, id: &ResourceId) -> Option<&BTreeMap<String, String>> {
        self.resources.get(id).map(|s| &s.outputs)
    }

    pub fn output(&self, id: &ResourceId, key: &str) -> Option<&str> {
        self.outputs(id).and_then(|o| o.get(key)).map(|s| s.as_str())
    }

    /// Whether a remote object for `id` was put there by this stack.
    /// An interrupted or failed create with no identifier yet still counts.
    pub fn is_managed(&self, id: &ResourceId) -> bool {
        match self.resources.get(id) {
            Some(s) if s.status == ResourceStatus::Destroyed => false,
            Some(s) => {
                s.identifier.is_some()
                    || s.create_attempted
                    || s.status == ResourceStatus::Creating
            }
            None => false,
        }
    }

    /// Re-enter `id` at `Pending` for a new run, keeping its identifier.
    pub fn begin(&mut self, id: &ResourceId) {
        let state = self
            .resources
            .entry(id.clone())
            .or_insert_with(ResourceState::pending);
        if state.status == ResourceStatus::Creating {
            state.create_attempted = true;
        }
        state.status = ResourceStatus::Pending;
        state.last_error = None;
        state.updated = Utc::now();
    }

    pub fn transition(&mut self, id: &ResourceId, next: ResourceStatus) -> DeployResult<()> {
        let state = self
            .resources
            .get_mut(id)
            .ok_or_else(|| DeployError::State(format!("{} is not in the ledger", id)))?;
        if !state.status.can_transition_to(next) {
            return Err(DeployError::State(format!(
                "{}: invalid transition {} -> {}",
                id, state.status, next
            )));
        }
        state.status = next;
        state.updated = Utc::now();
        if next == ResourceStatus::Creating {
            state.create_attempted = true;
        }
        Ok(())
    }

    /// Move to `Created` and record what the provider reported.
    pub fn record_created(
        &mut self,
        id: &ResourceId,
        remote: &RemoteObject,
        applied: &Attributes,
    ) -> DeployResult<()> {
        self.transition(id, ResourceStatus::Created)?;
        if let Some(state) = self.resources.get_mut(id) {
            state.identifier = Some(remote.identifier.clone());
            state.outputs = remote.outputs.clone();
            state.attributes = applied.clone();
        }
        Ok(())
    }

    pub fn record_failed(&mut self, id: &ResourceId, error: &DeployError) -> DeployResult<()> {
        self.transition(id, ResourceStatus::Failed)?;
        if let Some(state) = self.resources.get_mut(id) {
            state.last_error = Some(error.to_string());
        }
        Ok(())
    }

    pub fn record_destroyed(&mut self, id: &ResourceId) -> DeployResult<()> {
        self.transition(id, ResourceStatus::Destroyed)?;
        if let Some(state) = self.resources.get_mut(id) {
            state.identifier = None;
            state.outputs.clear();
            state.attributes.clear();
            state.create_attempted = false;
        }
        Ok(())
    }

    pub fn managed(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys().filter(move |id| self.is_managed(id))
    }

    pub fn to_yaml(&self) -> DeployResult<String> {
        serde_yaml::to_string(self).map_err(DeployError::state)
    }

    pub fn from_yaml(s: &str) -> DeployResult<Self> {
        serde_yaml::from_str(s).map_err(DeployError::state)
    }
}

/// Where the ledger persists between runs.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Load the ledger. An absent store yields an empty ledger.
    async fn load(&self) -> DeployResult<StateLedger>;

    async fn save(&self, ledger: &StateLedger) -> DeployResult<()>;

    /// Physical location, for humans.
    fn location(&self) -> String;
}

/// Ledger in `<dir>/state.yaml`.
pub struct LocalFsStore {
    path: PathBuf,
}

impl LocalFsStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join("state.yaml"),
        }
    }
}

#[async_trait::async_trait]
impl StateStore for LocalFsStore {
    async fn load(&self) -> DeployResult<StateLedger> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => StateLedger::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateLedger::new()),
            Err(e) => Err(DeployError::state(format!("{}: {}", self.path.display(), e))),
        }
    }

    async fn save(&self, ledger: &StateLedger) -> DeployResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(DeployError::state)?;
        }
        let yaml = ledger.to_yaml()?;
        // Write-then-rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml.as_bytes())
            .await
            .map_err(DeployError::state)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(DeployError::state)?;
        tracing::debug!("saved ledger to {}", self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    ledger: Mutex<Option<StateLedger>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current saved ledger, without going through the trait.
    pub fn snapshot(&self) -> StateLedger {
        self.ledger
            .lock()
            .ok()
            .and_then(|l| l.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> DeployResult<StateLedger> {
        Ok(self.snapshot())
    }

    async fn save(&self, ledger: &StateLedger) -> DeployResult<()> {
        let mut slot = self.ledger.lock().map_err(DeployError::state)?;
        *slot = Some(ledger.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".into()
    }
}
