//! Convergence engine - drives each resource from its remote state to the
//! declared one, strictly in resolved order.
//!
//! Fail-fast: the first failing resource halts the run and nothing after it is
//! attempted. The ledger is checkpointed before every mutating call so an
//! interrupted run leaves `Creating` behind rather than an unmanaged object.

use crate::artifact::PublishedArtifact;
use crate::error::{DeployError, DeployResult};
use crate::journal::{RunEvent, RunJournal};
use crate::ledger::{ResourceStatus, StateLedger, StateStore};
use serde::Serialize;
use stackup_core::template::{self, Token};
use stackup_core::{Attributes, ResourceDescriptor, ResourceId};
use stackup_provider::{ClientRegistry, ResourceClient, RetryPolicy, UpdatePolicy};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `plan` expects to happen to one resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    Update { keys: Vec<String> },
    NoChange,
    /// Differs remotely but the kind cannot be updated in place.
    Drift { keys: Vec<String> },
    Conflict { identifier: String },
    AwaitingArtifact,
    /// Exists remotely, but some referenced outputs are not recorded yet.
    AwaitingDependency,
}

impl PlannedAction {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Create | Self::Update { .. })
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update { keys } => write!(f, "update ({})", keys.join(", ")),
            Self::NoChange => write!(f, "no change"),
            Self::Drift { keys } => write!(f, "drift, immutable ({})", keys.join(", ")),
            Self::Conflict { identifier } => write!(f, "conflict: unmanaged '{}'", identifier),
            Self::AwaitingArtifact => write!(f, "awaiting artifact"),
            Self::AwaitingDependency => write!(f, "awaiting dependency outputs"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PlanEntry {
    pub resource: ResourceId,
    #[serde(flatten)]
    pub action: PlannedAction,
}

/// Resolved order plus the pending action for each resource.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn order(&self) -> Vec<&ResourceId> {
        self.entries.iter().map(|e| &e.resource).collect()
    }

    pub fn action(&self, id: &ResourceId) -> Option<&PlannedAction> {
        self.entries
            .iter()
            .find(|e| &e.resource == id)
            .map(|e| &e.action)
    }

    pub fn mutations(&self) -> usize {
        self.entries.iter().filter(|e| e.action.is_mutation()).count()
    }
}

/// What `converge` did to one resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Applied {
    Created,
    Updated { keys: Vec<String> },
    Unchanged,
    /// Immutable kind differs remotely; left alone.
    DriftIgnored { keys: Vec<String> },
}

impl std::fmt::Display for Applied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated { keys } => write!(f, "updated ({})", keys.join(", ")),
            Self::Unchanged => write!(f, "unchanged"),
            Self::DriftIgnored { keys } => write!(f, "drift ignored ({})", keys.join(", ")),
        }
    }
}

/// What `destroy` did to one resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Teardown {
    Destroyed,
    /// Managed, but already gone remotely.
    AlreadyAbsent,
    /// Never created by this stack.
    NotManaged,
}

impl std::fmt::Display for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Destroyed => write!(f, "destroyed"),
            Self::AlreadyAbsent => write!(f, "already absent"),
            Self::NotManaged => write!(f, "not managed"),
        }
    }
}

pub struct ConvergenceEngine {
    clients: Arc<ClientRegistry>,
    store: Arc<dyn StateStore>,
    journal: Arc<dyn RunJournal>,
    retry: RetryPolicy,
}

impl ConvergenceEngine {
    pub fn new(
        clients: Arc<ClientRegistry>,
        store: Arc<dyn StateStore>,
        journal: Arc<dyn RunJournal>,
    ) -> Self {
        Self {
            clients,
            store,
            journal,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn client(&self, descriptor: &ResourceDescriptor) -> DeployResult<Arc<dyn ResourceClient>> {
        self.clients
            .get(&descriptor.id.kind)
            .ok_or_else(|| DeployError::MissingClient {
                resource: descriptor.id.clone(),
                kind: descriptor.id.kind.clone(),
            })
    }

    async fn checkpoint(&self, ledger: &StateLedger) -> DeployResult<()> {
        self.store.save(ledger).await
    }

    async fn emit(&self, event: RunEvent) {
        let name = event.event.clone();
        if let Err(e) = self.journal.emit(event).await {
            warn!("journal: failed to record {}: {}", name, e);
        }
    }

    // ------------------------------------------------------------------
    // Plan
    // ------------------------------------------------------------------

    /// Read-only preview of one resource. Never calls a mutating operation.
    pub async fn plan_resource(
        &self,
        descriptor: &ResourceDescriptor,
        ledger: &StateLedger,
        artifact: Option<&PublishedArtifact>,
    ) -> DeployResult<PlannedAction> {
        if descriptor.requires_artifact() && artifact.is_none() {
            return Ok(PlannedAction::AwaitingArtifact);
        }
        let client = self.client(descriptor)?;
        let desired = render_attributes(descriptor, ledger, artifact, false)?;

        let remote = self
            .retry
            .run("read", || client.read(&descriptor.id))
            .await
            .map_err(|source| DeployError::RemoteRead {
                resource: descriptor.id.clone(),
                source,
            })?;

        Ok(match remote {
            None => PlannedAction::Create,
            Some(remote) if !ledger.is_managed(&descriptor.id) => PlannedAction::Conflict {
                identifier: remote.identifier,
            },
            Some(_) if desired.values().any(template::has_placeholders) => {
                PlannedAction::AwaitingDependency
            }
            Some(remote) if remote.matches(&desired) => PlannedAction::NoChange,
            Some(remote) => {
                let keys = remote.drifted_keys(&desired);
                match client.update_policy() {
                    UpdatePolicy::InPlace => PlannedAction::Update { keys },
                    UpdatePolicy::Immutable => PlannedAction::Drift { keys },
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------

    /// Converge `order` front to back, halting at the first failure.
    pub async fn converge(
        &self,
        run_id: &str,
        order: &[&ResourceDescriptor],
        ledger: &mut StateLedger,
        artifact: Option<&PublishedArtifact>,
    ) -> DeployResult<Vec<(ResourceId, Applied)>> {
        let mut applied = Vec::with_capacity(order.len());
        for descriptor in order {
            let result = self.converge_one(run_id, descriptor, ledger, artifact).await;
            // Persist whatever state the resource ended in, success or not
            let saved = self.checkpoint(ledger).await;
            match result {
                Ok(a) => {
                    saved?;
                    applied.push((descriptor.id.clone(), a));
                }
                Err(e) => {
                    if let Err(save_error) = saved {
                        warn!(resource = %descriptor.id, error = %save_error, "failed to record failure in the ledger");
                    }
                    warn!(resource = %descriptor.id, error = %e, "convergence halted");
                    self.emit(
                        RunEvent::new(run_id, "resource_failed")
                            .resource(&descriptor.id)
                            .data(serde_json::json!({
                                "error": e.to_string(),
                                "payload": e.payload(),
                            })),
                    )
                    .await;
                    return Err(e);
                }
            }
        }
        Ok(applied)
    }

    /// Converge a single resource. The ledger reflects the outcome either way.
    pub async fn converge_one(
        &self,
        run_id: &str,
        descriptor: &ResourceDescriptor,
        ledger: &mut StateLedger,
        artifact: Option<&PublishedArtifact>,
    ) -> DeployResult<Applied> {
        let id = &descriptor.id;
        // Decided before `begin` resets an interrupted `Creating`
        let managed = ledger.is_managed(id);
        ledger.begin(id);

        let prepared = self
            .client(descriptor)
            .and_then(|c| Ok((c, render_attributes(descriptor, ledger, artifact, true)?)));
        let (client, desired) = match prepared {
            Ok(p) => p,
            Err(e) => return fail(ledger, id, e),
        };
        let rendered = ResourceDescriptor {
            attributes: desired.clone(),
            ..descriptor.clone()
        };

        let remote = match self.retry.run("read", || client.read(id)).await {
            Ok(r) => r,
            Err(source) => {
                let e = DeployError::RemoteRead {
                    resource: id.clone(),
                    source,
                };
                return fail(ledger, id, e);
            }
        };

        let remote = match remote {
            Some(remote) => remote,
            None => {
                if ledger.identifier(id).is_some() {
                    info!(resource = %id, "managed resource vanished remotely, recreating");
                }
                if let Err(source) = client.validate(&rendered) {
                    let e = DeployError::RemoteCreate {
                        resource: id.clone(),
                        source,
                    };
                    return fail(ledger, id, e);
                }
                ledger.transition(id, ResourceStatus::Creating)?;
                self.checkpoint(ledger).await?;

                info!(resource = %id, "creating");
                let created = match self.retry.run("create", || client.create(&rendered)).await {
                    Ok(created) => created,
                    // A retried create whose first response was lost collides
                    // with the object it made
                    Err(source) if source.is_conflict() => {
                        match self.retry.run("read", || client.read(id)).await {
                            Ok(Some(existing)) => {
                                warn!(
                                    resource = %id,
                                    identifier = %existing.identifier,
                                    "create reported a conflict; recording the object this run created"
                                );
                                existing
                            }
                            _ => {
                                let e = DeployError::RemoteCreate {
                                    resource: id.clone(),
                                    source,
                                };
                                return fail(ledger, id, e);
                            }
                        }
                    }
                    Err(source) => {
                        let e = DeployError::RemoteCreate {
                            resource: id.clone(),
                            source,
                        };
                        return fail(ledger, id, e);
                    }
                };
                ledger.record_created(id, &created, &desired)?;
                self.emit(
                    RunEvent::new(run_id, "resource_created")
                        .resource(id)
                        .data(serde_json::json!({
                            "identifier": created.identifier,
                            "outputs": created.outputs,
                        })),
                )
                .await;
                return Ok(Applied::Created);
            }
        };

        if !managed {
            let e = DeployError::Conflict {
                resource: id.clone(),
                identifier: remote.identifier.clone(),
            };
            return fail(ledger, id, e);
        }

        if remote.matches(&desired) {
            debug!(resource = %id, "up to date");
            ledger.record_created(id, &remote, &desired)?;
            return Ok(Applied::Unchanged);
        }

        let keys = remote.drifted_keys(&desired);
        match client.update_policy() {
            UpdatePolicy::Immutable => {
                warn!(
                    resource = %id,
                    keys = ?keys,
                    "attributes differ but kind is immutable; leaving unchanged"
                );
                ledger.record_created(id, &remote, &remote.attributes)?;
                self.emit(
                    RunEvent::new(run_id, "resource_drift")
                        .resource(id)
                        .data(serde_json::json!({ "keys": keys })),
                )
                .await;
                Ok(Applied::DriftIgnored { keys })
            }
            UpdatePolicy::InPlace => {
                if let Err(source) = client.validate(&rendered) {
                    let e = DeployError::RemoteUpdate {
                        resource: id.clone(),
                        source,
                    };
                    return fail(ledger, id, e);
                }
                ledger.transition(id, ResourceStatus::Creating)?;
                self.checkpoint(ledger).await?;

                info!(resource = %id, keys = ?keys, "updating");
                let identifier = remote.identifier.clone();
                match self
                    .retry
                    .run("update", || client.update(&identifier, &rendered))
                    .await
                {
                    Ok(updated) => {
                        ledger.record_created(id, &updated, &desired)?;
                        self.emit(
                            RunEvent::new(run_id, "resource_updated")
                                .resource(id)
                                .data(serde_json::json!({ "keys": keys })),
                        )
                        .await;
                        Ok(Applied::Updated { keys })
                    }
                    Err(source) => fail(
                        ledger,
                        id,
                        DeployError::RemoteUpdate {
                            resource: id.clone(),
                            source,
                        },
                    ),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Destroy
    // ------------------------------------------------------------------

    /// Tear down `order` (already reversed), halting at the first failure so
    /// prerequisites of anything left standing are kept.
    pub async fn destroy(
        &self,
        run_id: &str,
        order: &[&ResourceDescriptor],
        ledger: &mut StateLedger,
    ) -> DeployResult<Vec<(ResourceId, Teardown)>> {
        let mut done = Vec::with_capacity(order.len());
        for descriptor in order {
            let result = self.destroy_one(run_id, descriptor, ledger).await;
            let saved = self.checkpoint(ledger).await;
            match result {
                Ok(t) => {
                    saved?;
                    done.push((descriptor.id.clone(), t));
                }
                Err(e) => {
                    if let Err(save_error) = saved {
                        warn!(resource = %descriptor.id, error = %save_error, "failed to record failure in the ledger");
                    }
                    warn!(resource = %descriptor.id, error = %e, "teardown halted");
                    return Err(e);
                }
            }
        }
        Ok(done)
    }

    async fn destroy_one(
        &self,
        run_id: &str,
        descriptor: &ResourceDescriptor,
        ledger: &mut StateLedger,
    ) -> DeployResult<Teardown> {
        let id = &descriptor.id;
        if !ledger.is_managed(id) {
            debug!(resource = %id, "not managed, skipping");
            return Ok(Teardown::NotManaged);
        }
        let client = self.client(descriptor)?;
        ledger.begin(id);

        // An interrupted create may not have recorded its identifier
        let identifier = match ledger.identifier(id) {
            Some(i) => Some(i.to_string()),
            None => self
                .retry
                .run("read", || client.read(id))
                .await
                .map_err(|source| DeployError::RemoteRead {
                    resource: id.clone(),
                    source,
                })?
                .map(|r| r.identifier),
        };
        let Some(identifier) = identifier else {
            ledger.record_destroyed(id)?;
            return Ok(Teardown::AlreadyAbsent);
        };

        info!(resource = %id, identifier = %identifier, "destroying");
        let teardown = match self.retry.run("destroy", || client.destroy(&identifier)).await {
            Ok(()) => Teardown::Destroyed,
            Err(e) if e.is_not_found() => Teardown::AlreadyAbsent,
            Err(source) => {
                let e = DeployError::RemoteDestroy {
                    resource: id.clone(),
                    source,
                };
                ledger.record_failed(id, &e)?;
                return Err(e);
            }
        };
        ledger.record_destroyed(id)?;
        self.emit(
            RunEvent::new(run_id, "resource_destroyed")
                .resource(id)
                .data(serde_json::json!({ "identifier": identifier })),
        )
        .await;
        Ok(teardown)
    }
}

fn fail<T>(ledger: &mut StateLedger, id: &ResourceId, e: DeployError) -> DeployResult<T> {
    ledger.record_failed(id, &e)?;
    Err(e)
}

/// Substitute artifact and output references. With `strict` unset, anything
/// not yet available is left as a placeholder.
pub fn render_attributes(
    descriptor: &ResourceDescriptor,
    ledger: &StateLedger,
    artifact: Option<&PublishedArtifact>,
    strict: bool,
) -> DeployResult<Attributes> {
    let id = &descriptor.id;
    let mut resolve = |token: &Token| -> DeployResult<Option<String>> {
        let value = match token {
            Token::Artifact(field) => artifact.and_then(|a| a.field(field)),
            Token::Output { resource, output } => ledger
                .output(resource, output)
                .map(|s| s.to_string()),
            Token::Variable(_) | Token::Invalid(_) => None,
        };
        match value {
            Some(v) => Ok(Some(v)),
            None if !strict => Ok(None),
            None => Err(match token {
                Token::Artifact(_) if artifact.is_none() => DeployError::ArtifactRequired {
                    resource: id.clone(),
                },
                other => DeployError::UnresolvedReference {
                    resource: id.clone(),
                    reference: describe(other),
                },
            }),
        }
    };

    let mut out = Attributes::new();
    for (key, value) in &descriptor.attributes {
        out.insert(key.clone(), template::render_value(value, &mut resolve)?);
    }
    Ok(out)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Variable(name) => format!("${{var.{}}}", name),
        Token::Artifact(field) => format!("${{artifact.{}}}", field),
        Token::Output { resource, output } => format!("${{{}.{}}}", resource, output),
        Token::Invalid(raw) => format!("${{{}}}", raw),
    }
}
