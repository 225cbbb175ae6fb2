//! Run journal - structured events and a summary report per run.
//!
//! Journal failures are logged and never fail a deployment.

use crate::error::{DeployError, DeployResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackup_core::ResourceId;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// One JSONL line in `events.jsonl`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunEvent {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl RunEvent {
    pub fn new(run_id: &str, event: &str) -> Self {
        Self {
            ts: Utc::now(),
            run_id: run_id.into(),
            event: event.into(),
            resource: None,
            data: serde_json::json!({}),
        }
    }

    pub fn resource(mut self, id: &ResourceId) -> Self {
        self.resource = Some(id.address());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Pending,
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one run, rendered as `report.md`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub command: String,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    /// (address, what happened)
    pub steps: Vec<(String, String)>,
    pub endpoint: Option<String>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: &str, command: &str) -> Self {
        Self {
            run_id: run_id.into(),
            command: command.into(),
            started: Utc::now(),
            ended: None,
            outcome: RunOutcome::Pending,
            steps: Vec::new(),
            endpoint: None,
            error: None,
        }
    }

    pub fn step(&mut self, what: impl Into<String>, detail: impl Into<String>) {
        self.steps.push((what.into(), detail.into()));
    }

    pub fn finalize(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.ended = Some(Utc::now());
    }

    pub fn wall_ms(&self) -> u64 {
        self.ended
            .map(|end| (end - self.started).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("# stackup {} {}\n\n", self.command, self.run_id);
        out.push_str(&format!("- started: {}\n", self.started.format("%Y-%m-%dT%H:%M:%S")));
        out.push_str(&format!("- outcome: {}\n", self.outcome));
        out.push_str(&format!("- wall: {}ms\n", self.wall_ms()));
        if let Some(endpoint) = &self.endpoint {
            out.push_str(&format!("- endpoint: {}\n", endpoint));
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("- error: {}\n", error));
        }
        if !self.steps.is_empty() {
            out.push_str("\n| resource | result |\n|---|---|\n");
            for (what, detail) in &self.steps {
                out.push_str(&format!("| {} | {} |\n", what, detail));
            }
        }
        out
    }
}

#[async_trait::async_trait]
pub trait RunJournal: Send + Sync {
    async fn emit(&self, event: RunEvent) -> DeployResult<()>;

    async fn write_report(&self, record: &RunRecord) -> DeployResult<()>;

    fn run_location(&self, run_id: &str) -> String;
}

/// Writes `<base>/<run_id>/events.jsonl` and `<base>/<run_id>/report.md`.
pub struct LocalFsJournal {
    base_dir: PathBuf,
}

impl LocalFsJournal {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(run_id)
    }
}

#[async_trait::async_trait]
impl RunJournal for LocalFsJournal {
    async fn emit(&self, event: RunEvent) -> DeployResult<()> {
        let dir = self.run_dir(&event.run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(DeployError::state)?;
        let mut line = serde_json::to_string(&event).map_err(DeployError::state)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))
            .await
            .map_err(DeployError::state)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(DeployError::state)?;
        Ok(())
    }

    async fn write_report(&self, record: &RunRecord) -> DeployResult<()> {
        let dir = self.run_dir(&record.run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(DeployError::state)?;
        tokio::fs::write(dir.join("report.md"), record.to_markdown())
            .await
            .map_err(DeployError::state)?;
        tracing::debug!("wrote run report to {}", dir.display());
        Ok(())
    }

    fn run_location(&self, run_id: &str) -> String {
        self.run_dir(run_id).display().to_string()
    }
}

pub struct NullJournal;

#[async_trait::async_trait]
impl RunJournal for NullJournal {
    async fn emit(&self, _event: RunEvent) -> DeployResult<()> {
        Ok(())
    }

    async fn write_report(&self, _record: &RunRecord) -> DeployResult<()> {
        Ok(())
    }

    fn run_location(&self, _run_id: &str) -> String {
        String::new()
    }
}
