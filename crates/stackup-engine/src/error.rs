//! Deployment error types

use stackup_core::{ResourceId, ResourceKind};
use stackup_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Config(#[from] stackup_core::Error),

    #[error("create failed for {resource}: {source}")]
    RemoteCreate {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("update failed for {resource}: {source}")]
    RemoteUpdate {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("read failed for {resource}: {source}")]
    RemoteRead {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("destroy failed for {resource}: {source}")]
    RemoteDestroy {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("{resource} already exists remotely as '{identifier}' but is not managed by this stack")]
    Conflict {
        resource: ResourceId,
        identifier: String,
    },

    #[error("no client registered for kind '{kind}' (needed by {resource})")]
    MissingClient {
        resource: ResourceId,
        kind: ResourceKind,
    },

    #[error("{resource} references an output that is not available: {reference}")]
    UnresolvedReference {
        resource: ResourceId,
        reference: String,
    },

    #[error("{resource} needs a published artifact but none was supplied")]
    ArtifactRequired { resource: ResourceId },

    #[error("artifact publication failed: {message}")]
    Publish {
        message: String,
        output: Option<String>,
    },

    #[error("{resource} did not become healthy after {probes} probes ({consecutive_failures} consecutive failures, {waited_ms}ms)")]
    ProbeTimeout {
        resource: ResourceId,
        probes: u32,
        consecutive_failures: u32,
        waited_ms: u64,
    },

    #[error("{resource} has no usable endpoint: {message}")]
    InvalidEndpoint {
        resource: ResourceId,
        message: String,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("state error: {0}")]
    State(String),
}

pub type DeployResult<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// The resource this error is about, if any.
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::RemoteCreate { resource, .. }
            | Self::RemoteUpdate { resource, .. }
            | Self::RemoteRead { resource, .. }
            | Self::RemoteDestroy { resource, .. }
            | Self::Conflict { resource, .. }
            | Self::MissingClient { resource, .. }
            | Self::UnresolvedReference { resource, .. }
            | Self::ArtifactRequired { resource }
            | Self::ProbeTimeout { resource, .. }
            | Self::InvalidEndpoint { resource, .. } => Some(resource),
            Self::Config(stackup_core::Error::UnknownDependency { resource, .. })
            | Self::Config(stackup_core::Error::InvalidDescriptor { resource, .. }) => Some(resource),
            _ => None,
        }
    }

    /// Raw provider or tool output attached to the failure.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::RemoteCreate { source, .. }
            | Self::RemoteUpdate { source, .. }
            | Self::RemoteRead { source, .. }
            | Self::RemoteDestroy { source, .. } => source.payload(),
            Self::Publish { output, .. } => output.as_deref(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn state(e: impl std::fmt::Display) -> Self {
        Self::State(e.to_string())
    }
}
