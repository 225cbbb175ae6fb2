//! Error types for stackup declarations

use crate::types::ResourceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceId> },

    #[error("duplicate resource: {0}")]
    DuplicateResource(ResourceId),

    #[error("{resource} depends on unknown resource {missing}")]
    UnknownDependency {
        resource: ResourceId,
        missing: ResourceId,
    },

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("unknown variable '{name}' in {resource}")]
    UnknownVariable { resource: ResourceId, name: String },

    #[error("invalid resource address: {0}")]
    InvalidAddress(String),

    #[error("invalid descriptor {resource}: {message}")]
    InvalidDescriptor {
        resource: ResourceId,
        message: String,
    },

    #[error("declaration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(resource: &ResourceId, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            resource: resource.clone(),
            message: message.into(),
        }
    }

    /// Resources participating in a cycle, if this is a cycle error.
    pub fn cycle_members(&self) -> Option<&[ResourceId]> {
        match self {
            Self::CyclicDependency { cycle } => Some(cycle),
            _ => None,
        }
    }
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
