//! stackup engine - convergence, readiness, and the deployment sequence

pub mod artifact;
pub mod convergence;
pub mod driver;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod readiness;

pub use artifact::{ArtifactPublisher, CommandPublisher, PublishedArtifact, RecordingPublisher};
pub use convergence::{Applied, ConvergenceEngine, Plan, PlanEntry, PlannedAction, Teardown};
pub use driver::{DeploymentDriver, DeploymentResult, FailureRecord, StatusEntry, Step};
pub use error::{DeployError, DeployResult};
pub use journal::{LocalFsJournal, NullJournal, RunEvent, RunJournal, RunOutcome, RunRecord};
pub use ledger::{LocalFsStore, MemoryStore, ResourceState, ResourceStatus, StateLedger, StateStore};
pub use readiness::{GateCounters, GateOutcome, GateState, HttpProbe, Probe, ProbeResult, ReadinessGate};
