//! Core types for stackup

use crate::error::{Error, Result};
use crate::template::{self, Token};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Desired (or observed) attribute set of a resource.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Resource kind - an open set, cheaply cloneable.
///
/// Kinds are plain names rather than a closed enum so a new kind only needs a
/// client registered for it.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourceKind(Arc<str>);

impl ResourceKind {
    pub const REGISTRY: &'static str = "registry";
    pub const LIFECYCLE_POLICY: &'static str = "lifecycle_policy";
    pub const ACCESS_ROLE: &'static str = "access_role";
    pub const POLICY_ATTACHMENT: &'static str = "policy_attachment";
    pub const HOSTED_SERVICE: &'static str = "hosted_service";

    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn registry() -> Self {
        Self::new(Self::REGISTRY)
    }

    pub fn lifecycle_policy() -> Self {
        Self::new(Self::LIFECYCLE_POLICY)
    }

    pub fn access_role() -> Self {
        Self::new(Self::ACCESS_ROLE)
    }

    pub fn policy_attachment() -> Self {
        Self::new(Self::POLICY_ATTACHMENT)
    }

    pub fn hosted_service() -> Self {
        Self::new(Self::HOSTED_SERVICE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_hosted_service(&self) -> bool {
        self.as_str() == Self::HOSTED_SERVICE
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceKind {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ResourceKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<ResourceKind> for String {
    fn from(k: ResourceKind) -> Self {
        k.0.to_string()
    }
}

/// Resource identity: kind + name, addressed as `kind.name`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<ResourceKind>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse a `kind.name` address. The kind is everything before the first dot.
    pub fn parse(address: &str) -> Result<Self> {
        match address.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind, name))
            }
            _ => Err(Error::InvalidAddress(address.to_string())),
        }
    }

    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.address()
    }
}

/// Probe protocol
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    #[default]
    Http,
    Https,
}

impl ProbeProtocol {
    pub fn scheme(&self) -> &str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Health check attached to a hosted service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub protocol: ProbeProtocol,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

fn default_path() -> String {
    "/".into()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_healthy_threshold() -> u32 {
    1
}

fn default_unhealthy_threshold() -> u32 {
    5
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            protocol: ProbeProtocol::default(),
            path: default_path(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

impl HealthCheckSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Longest the gate may wait without reaching `Healthy`.
    pub fn wait_budget(&self) -> Duration {
        (self.interval() + self.timeout()) * self.unhealthy_threshold
    }

    pub fn validate(&self, resource: &ResourceId) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::invalid(resource, "health check path must start with '/'"));
        }
        if self.interval_secs == 0 || self.timeout_secs == 0 {
            return Err(Error::invalid(
                resource,
                "health check interval and timeout must be positive",
            ));
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            return Err(Error::invalid(
                resource,
                "health check thresholds must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Declared desired state of one resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit dependencies, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

impl ResourceDescriptor {
    pub fn new(kind: impl Into<ResourceKind>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
            health_check: None,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    pub fn with_health_check(mut self, spec: HealthCheckSpec) -> Self {
        self.health_check = Some(spec);
        self
    }

    /// Resources whose outputs are referenced from attribute values.
    pub fn referenced_resources(&self) -> Vec<ResourceId> {
        let mut out = Vec::new();
        for value in self.attributes.values() {
            for token in template::tokens_in_value(value) {
                if let Token::Output { resource, .. } = token {
                    if !out.contains(&resource) {
                        out.push(resource);
                    }
                }
            }
        }
        out
    }

    /// Explicit dependencies followed by implicit reference edges, deduplicated.
    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps = self.depends_on.clone();
        for id in self.referenced_resources() {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        deps
    }

    /// Whether any attribute needs the published artifact.
    pub fn requires_artifact(&self) -> bool {
        self.attributes.values().any(|v| {
            template::tokens_in_value(v)
                .into_iter()
                .any(|t| matches!(t, Token::Artifact(_)))
        })
    }
}
