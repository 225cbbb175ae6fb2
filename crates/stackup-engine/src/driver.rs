//! Deployment driver - the top-level sequence.
//!
//! apply: resolve -> converge what does not need the artifact -> publish ->
//! converge the rest -> readiness gate -> report the endpoint.
//!
//! Two runs against the same state must not overlap. Serializing them is the
//! caller's job.

use crate::artifact::{target_reference, ArtifactPublisher, PublishedArtifact};
use crate::convergence::{render_attributes, Applied, ConvergenceEngine, Plan, PlanEntry, Teardown};
use crate::error::{DeployError, DeployResult};
use crate::journal::{RunEvent, RunJournal, RunOutcome, RunRecord};
use crate::ledger::{ResourceStatus, StateLedger, StateStore};
use crate::readiness::{probe_url, GateOutcome, Probe, ReadinessGate};
use serde::Serialize;
use stackup_core::{resolver, DescriptorStore, ResourceDescriptor, ResourceId, Stack};
use stackup_provider::{ClientRegistry, RetryPolicy};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which part of the sequence failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Resolve,
    LoadState,
    Converge,
    Publish,
    Readiness,
    Teardown,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::LoadState => write!(f, "load state"),
            Self::Converge => write!(f, "converge"),
            Self::Publish => write!(f, "publish"),
            Self::Readiness => write!(f, "readiness"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

#[derive(Debug)]
pub struct FailureRecord {
    pub step: Step,
    /// First resource that failed, when the failure is about one.
    pub resource: Option<ResourceId>,
    pub error: DeployError,
}

impl FailureRecord {
    pub fn new(step: Step, error: DeployError) -> Self {
        Self {
            step,
            resource: error.resource().cloned(),
            error,
        }
    }

    /// Raw provider or tool output, if any.
    pub fn payload(&self) -> Option<&str> {
        self.error.payload()
    }
}

impl std::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.resource {
            Some(r) => write!(f, "{} failed at {}: {}", self.step, r, self.error),
            None => write!(f, "{} failed: {}", self.step, self.error),
        }
    }
}

#[derive(Debug)]
pub enum DeploymentResult {
    Deployed {
        /// Service address, absent when the run did not include a service.
        endpoint: Option<String>,
        applied: Vec<(ResourceId, Applied)>,
    },
    Failed(FailureRecord),
}

impl DeploymentResult {
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Deployed { endpoint, .. } => endpoint.as_deref(),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            Self::Failed(f) => Some(f),
            Self::Deployed { .. } => None,
        }
    }
}

/// One row of `status()`.
#[derive(Clone, Debug, Serialize)]
pub struct StatusEntry {
    pub resource: ResourceId,
    /// `None` when never applied.
    pub status: Option<ResourceStatus>,
    pub identifier: Option<String>,
    pub outputs: BTreeMap<String, String>,
    /// False for ledger entries no longer in the declaration.
    pub declared: bool,
}

pub struct DeploymentDriver {
    stack: Stack,
    engine: ConvergenceEngine,
    store: Arc<dyn StateStore>,
    journal: Arc<dyn RunJournal>,
    publisher: Arc<dyn ArtifactPublisher>,
    probe: Arc<dyn Probe>,
}

impl DeploymentDriver {
    pub fn new(
        stack: Stack,
        clients: Arc<ClientRegistry>,
        store: Arc<dyn StateStore>,
        journal: Arc<dyn RunJournal>,
        publisher: Arc<dyn ArtifactPublisher>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        let engine = ConvergenceEngine::new(clients, store.clone(), journal.clone());
        Self {
            stack,
            engine,
            store,
            journal,
            publisher,
            probe,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.engine = self.engine.with_retry(retry);
        self
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    fn descriptors<'a>(&'a self, order: &[ResourceId]) -> Vec<&'a ResourceDescriptor> {
        order
            .iter()
            .filter_map(|id| self.stack.store.get(id))
            .collect()
    }

    async fn emit(&self, event: RunEvent) {
        let name = event.event.clone();
        if let Err(e) = self.journal.emit(event).await {
            warn!("journal: failed to record {}: {}", name, e);
        }
    }

    async fn finish(&self, record: &mut RunRecord, outcome: RunOutcome) {
        record.finalize(outcome.clone());
        self.emit(
            RunEvent::new(&record.run_id, "run_finished").data(serde_json::json!({
                "outcome": outcome,
                "wall_ms": record.wall_ms(),
                "error": record.error,
            })),
        )
        .await;
        if let Err(e) = self.journal.write_report(record).await {
            warn!("journal: failed to write report: {}", e);
        }
        info!(
            run_id = %record.run_id,
            outcome = %record.outcome,
            location = %self.journal.run_location(&record.run_id),
            "run finished"
        );
    }

    // ------------------------------------------------------------------
    // plan
    // ------------------------------------------------------------------

    /// Resolved order plus the pending action per resource. Read-only.
    pub async fn plan(
        &self,
        targets: Option<&[ResourceId]>,
        artifact_ref: Option<&str>,
    ) -> DeployResult<Plan> {
        let order = resolver::resolve_subset(&self.stack.store, targets)?;
        let ledger = self.store.load().await?;
        let predicted = self.predicted_artifact(&ledger, artifact_ref);

        let mut plan = Plan::default();
        for descriptor in self.descriptors(&order) {
            let action = self
                .engine
                .plan_resource(descriptor, &ledger, predicted.as_ref())
                .await?;
            plan.entries.push(PlanEntry {
                resource: descriptor.id.clone(),
                action,
            });
        }
        Ok(plan)
    }

    /// The reference a publish would produce, without publishing.
    fn predicted_artifact(
        &self,
        ledger: &StateLedger,
        artifact_ref: Option<&str>,
    ) -> Option<PublishedArtifact> {
        let binding = self.stack.artifact.as_ref()?;
        let source = artifact_ref
            .map(str::to_string)
            .or_else(|| binding.image.clone())?;
        let address = ledger.output(&binding.registry, "url")?;
        Some(PublishedArtifact {
            image: target_reference(&source, address),
            source,
        })
    }

    // ------------------------------------------------------------------
    // apply
    // ------------------------------------------------------------------

    /// Converge `targets` (or everything) and wait for readiness.
    /// No rollback on failure: created resources stay, re-run or destroy.
    pub async fn apply(
        &self,
        targets: Option<&[ResourceId]>,
        artifact_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> DeploymentResult {
        let run_id = new_run_id();
        let mut record = RunRecord::new(&run_id, "apply");
        self.emit(RunEvent::new(&run_id, "run_started").data(serde_json::json!({
            "command": "apply",
            "targets": targets.map(|t| t.iter().map(|id| id.address()).collect::<Vec<_>>()),
            "artifact": artifact_ref,
        })))
        .await;

        let result = self
            .apply_steps(&run_id, targets, artifact_ref, cancel, &mut record)
            .await;

        match result {
            Ok((endpoint, applied)) => {
                record.endpoint = endpoint.clone();
                self.finish(&mut record, RunOutcome::Success).await;
                DeploymentResult::Deployed { endpoint, applied }
            }
            Err(failure) => {
                warn!(run_id = %run_id, "{}", failure);
                record.error = Some(failure.to_string());
                let outcome = if failure.error.is_cancelled() {
                    RunOutcome::Cancelled
                } else {
                    RunOutcome::Failure
                };
                self.finish(&mut record, outcome).await;
                DeploymentResult::Failed(failure)
            }
        }
    }

    async fn apply_steps(
        &self,
        run_id: &str,
        targets: Option<&[ResourceId]>,
        artifact_ref: Option<&str>,
        cancel: &CancellationToken,
        record: &mut RunRecord,
    ) -> Result<(Option<String>, Vec<(ResourceId, Applied)>), FailureRecord> {
        let order = resolver::resolve_subset(&self.stack.store, targets)
            .map_err(|e| FailureRecord::new(Step::Resolve, e.into()))?;
        let mut ledger = self
            .store
            .load()
            .await
            .map_err(|e| FailureRecord::new(Step::LoadState, e))?;
        for id in &order {
            ledger.begin(id);
        }
        self.store
            .save(&ledger)
            .await
            .map_err(|e| FailureRecord::new(Step::LoadState, e))?;

        let (ready, gated) = split_on_artifact(&self.stack.store, &order);
        info!(
            run_id,
            resources = order.len(),
            awaiting_artifact = gated.len(),
            "applying"
        );

        let mut applied = self
            .engine
            .converge(run_id, &ready, &mut ledger, None)
            .await
            .map_err(|e| FailureRecord::new(Step::Converge, e))?;

        if gated.is_empty() {
            info!("no resource in this run needs the artifact, skipping publication");
        } else {
            if cancel.is_cancelled() {
                return Err(FailureRecord::new(Step::Publish, DeployError::Cancelled));
            }
            let reusable = self
                .predicted_artifact(&ledger, artifact_ref)
                .filter(|p| already_applied(&gated, &ledger, p));
            let published = match reusable {
                Some(p) => {
                    info!(image = %p.image, "artifact already published and applied, skipping publication");
                    record.step("artifact", format!("reused {}", p.image));
                    p
                }
                None => {
                    let p = self
                        .publish(run_id, &gated, &ledger, artifact_ref)
                        .await
                        .map_err(|e| FailureRecord::new(Step::Publish, e))?;
                    record.step("artifact", format!("published {}", p.image));
                    p
                }
            };
            let more = self
                .engine
                .converge(run_id, &gated, &mut ledger, Some(&published))
                .await
                .map_err(|e| FailureRecord::new(Step::Converge, e))?;
            applied.extend(more);
        }
        for (id, a) in &applied {
            record.step(id.address(), a.to_string());
        }

        let mut endpoint = None;
        for descriptor in self.descriptors(&order) {
            if !descriptor.id.kind.is_hosted_service() {
                continue;
            }
            let url = ledger.output(&descriptor.id, "url").map(str::to_string);
            if let Some(spec) = &descriptor.health_check {
                if cancel.is_cancelled() {
                    return Err(FailureRecord::new(Step::Readiness, DeployError::Cancelled));
                }
                self.await_ready(run_id, descriptor, url.as_deref(), spec, cancel)
                    .await
                    .map_err(|e| FailureRecord::new(Step::Readiness, e))?;
                record.step(descriptor.id.address(), "healthy");
            }
            endpoint = url.or(endpoint);
        }
        Ok((endpoint, applied))
    }

    async fn publish(
        &self,
        run_id: &str,
        gated: &[&ResourceDescriptor],
        ledger: &StateLedger,
        artifact_ref: Option<&str>,
    ) -> DeployResult<PublishedArtifact> {
        let needs = gated
            .iter()
            .find(|d| d.requires_artifact())
            .or(gated.first())
            .map(|d| d.id.clone());
        let required = || match &needs {
            Some(resource) => DeployError::ArtifactRequired {
                resource: resource.clone(),
            },
            None => DeployError::Publish {
                message: "nothing to publish".into(),
                output: None,
            },
        };

        let binding = self.stack.artifact.as_ref().ok_or_else(required)?;
        let source = artifact_ref
            .map(str::to_string)
            .or_else(|| binding.image.clone())
            .ok_or_else(required)?;
        let address = ledger
            .output(&binding.registry, "url")
            .filter(|_| ledger.is_managed(&binding.registry))
            .ok_or_else(|| DeployError::Publish {
                message: format!(
                    "registry {} has no address yet; apply it before publishing",
                    binding.registry
                ),
                output: None,
            })?;

        let published = self.publisher.publish(&source, address).await?;
        self.emit(
            RunEvent::new(run_id, "artifact_published")
                .resource(&binding.registry)
                .data(serde_json::json!({
                    "source": published.source,
                    "image": published.image,
                })),
        )
        .await;
        Ok(published)
    }

    async fn await_ready(
        &self,
        run_id: &str,
        descriptor: &ResourceDescriptor,
        endpoint: Option<&str>,
        spec: &stackup_core::HealthCheckSpec,
        cancel: &CancellationToken,
    ) -> DeployResult<()> {
        let id = &descriptor.id;
        let endpoint = endpoint.ok_or_else(|| DeployError::InvalidEndpoint {
            resource: id.clone(),
            message: "service reported no url".into(),
        })?;
        let url = probe_url(id, endpoint, spec)?;

        let outcome = ReadinessGate::new(self.probe.clone(), spec.clone())
            .wait(&url, cancel)
            .await;
        let data = match &outcome {
            GateOutcome::Healthy { probes, elapsed } => serde_json::json!({
                "state": "healthy", "url": url, "probes": probes,
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
            GateOutcome::TimedOut {
                probes,
                consecutive_failures,
                elapsed,
            } => serde_json::json!({
                "state": "timed_out", "url": url, "probes": probes,
                "consecutive_failures": consecutive_failures,
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
            GateOutcome::Cancelled => serde_json::json!({ "state": "cancelled", "url": url }),
        };
        self.emit(RunEvent::new(run_id, "readiness").resource(id).data(data))
            .await;
        outcome.into_result(id)
    }

    // ------------------------------------------------------------------
    // destroy
    // ------------------------------------------------------------------

    /// Tear everything down in reverse order. Safe to repeat.
    pub async fn destroy(&self) -> Result<Vec<(ResourceId, Teardown)>, FailureRecord> {
        let run_id = new_run_id();
        let mut record = RunRecord::new(&run_id, "destroy");
        self.emit(RunEvent::new(&run_id, "run_started").data(serde_json::json!({ "command": "destroy" })))
            .await;

        let result = self.destroy_steps(&run_id).await;
        match &result {
            Ok(done) => {
                for (id, t) in done {
                    record.step(id.address(), t.to_string());
                }
                self.finish(&mut record, RunOutcome::Success).await;
            }
            Err(failure) => {
                record.error = Some(failure.to_string());
                self.finish(&mut record, RunOutcome::Failure).await;
            }
        }
        result
    }

    async fn destroy_steps(&self, run_id: &str) -> Result<Vec<(ResourceId, Teardown)>, FailureRecord> {
        let order = resolver::teardown_order(&self.stack.store)
            .map_err(|e| FailureRecord::new(Step::Resolve, e.into()))?;
        let mut ledger = self
            .store
            .load()
            .await
            .map_err(|e| FailureRecord::new(Step::LoadState, e))?;

        for orphan in ledger.managed().filter(|id| !self.stack.store.contains(id)) {
            warn!(resource = %orphan, "managed resource is no longer declared; not destroying it");
        }

        self.engine
            .destroy(run_id, &self.descriptors(&order), &mut ledger)
            .await
            .map_err(|e| FailureRecord::new(Step::Teardown, e))
    }

    // ------------------------------------------------------------------
    // status
    // ------------------------------------------------------------------

    /// Recorded state of every declared resource, in resolved order, then
    /// any ledger entries that are no longer declared.
    pub async fn status(&self) -> DeployResult<Vec<StatusEntry>> {
        let ledger = self.store.load().await?;
        let order = resolver::resolve(&self.stack.store)?;

        let mut entries: Vec<StatusEntry> = order
            .iter()
            .map(|id| entry(&ledger, id, true))
            .collect();
        entries.extend(
            ledger
                .resources
                .keys()
                .filter(|id| !self.stack.store.contains(id))
                .map(|id| entry(&ledger, id, false)),
        );
        Ok(entries)
    }
}

fn entry(ledger: &StateLedger, id: &ResourceId, declared: bool) -> StatusEntry {
    let state = ledger.get(id);
    StatusEntry {
        resource: id.clone(),
        status: state.map(|s| s.status),
        identifier: state.and_then(|s| s.identifier.clone()),
        outputs: state.map(|s| s.outputs.clone()).unwrap_or_default(),
        declared,
    }
}

fn new_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"), &id[..8])
}

/// Whether every gated resource was last applied with exactly what `artifact`
/// renders to now, so publishing again would change nothing.
fn already_applied(
    gated: &[&ResourceDescriptor],
    ledger: &StateLedger,
    artifact: &PublishedArtifact,
) -> bool {
    gated.iter().all(|descriptor| {
        let Some(state) = ledger.get(&descriptor.id) else {
            return false;
        };
        state.identifier.is_some()
            && render_attributes(descriptor, ledger, Some(artifact), true)
                .map(|desired| desired == state.attributes)
                .unwrap_or(false)
    })
}

/// Split `order` into resources that can converge now and those that must
/// wait for the artifact, either directly or through a dependency.
/// Relative order is kept on both sides.
fn split_on_artifact<'a>(
    store: &'a DescriptorStore,
    order: &[ResourceId],
) -> (Vec<&'a ResourceDescriptor>, Vec<&'a ResourceDescriptor>) {
    let mut gated_ids: HashSet<&ResourceId> = HashSet::new();
    let mut ready = Vec::new();
    let mut gated = Vec::new();
    for descriptor in order.iter().filter_map(|id| store.get(id)) {
        let blocked = descriptor.requires_artifact()
            || descriptor
                .dependencies()
                .iter()
                .any(|dep| gated_ids.contains(dep));
        if blocked {
            gated_ids.insert(&descriptor.id);
            gated.push(descriptor);
        } else {
            ready.push(descriptor);
        }
    }
    (ready, gated)
}
