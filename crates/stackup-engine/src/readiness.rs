//! Readiness gate - polls a service's health endpoint until it is confirmed
//! healthy, the failure budget runs out, or the caller cancels.

use crate::error::{DeployError, DeployResult};
use serde::Serialize;
use stackup_core::{HealthCheckSpec, ResourceId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a single probe.
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeResult {
    Success { status: u16 },
    Failure { reason: String },
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// One check of `url`. Must finish within `timeout`.
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult;
}

/// HTTP GET; any 2xx within the timeout is a success.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Success {
                status: resp.status().as_u16(),
            },
            Ok(resp) => ProbeResult::Failure {
                reason: format!("status {}", resp.status()),
            },
            Err(e) if e.is_timeout() => ProbeResult::Failure {
                reason: format!("timed out after {}ms", timeout.as_millis()),
            },
            Err(e) => ProbeResult::Failure {
                reason: e.to_string(),
            },
        }
    }
}

/// Probe target: the service endpoint with the check's scheme and path.
pub fn probe_url(resource: &ResourceId, endpoint: &str, spec: &HealthCheckSpec) -> DeployResult<String> {
    let invalid = |message: String| DeployError::InvalidEndpoint {
        resource: resource.clone(),
        message,
    };
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("{}://{}", spec.protocol.scheme(), endpoint)
    };
    let mut url = url::Url::parse(&with_scheme).map_err(|e| invalid(format!("{}: {}", endpoint, e)))?;
    url.set_scheme(spec.protocol.scheme())
        .map_err(|_| invalid(format!("cannot use scheme {} for {}", spec.protocol.scheme(), endpoint)))?;
    url.set_path(&spec.path);
    Ok(url.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Waiting,
    Healthy,
    /// Had successes, now failing. Observability only.
    Degraded,
    TimedOut,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Counter state machine, independent of time and I/O.
#[derive(Clone, Debug)]
pub struct GateCounters {
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    pub state: GateState,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub probes: u32,
    seen_success: bool,
}

impl GateCounters {
    pub fn new(spec: &HealthCheckSpec) -> Self {
        Self {
            healthy_threshold: spec.healthy_threshold.max(1),
            unhealthy_threshold: spec.unhealthy_threshold.max(1),
            state: GateState::Waiting,
            consecutive_successes: 0,
            consecutive_failures: 0,
            probes: 0,
            seen_success: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, GateState::Healthy | GateState::TimedOut)
    }

    /// Feed one probe result and return the resulting state.
    pub fn observe(&mut self, success: bool) -> GateState {
        if self.is_terminal() {
            return self.state;
        }
        self.probes += 1;
        if success {
            self.seen_success = true;
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.state = if self.consecutive_successes >= self.healthy_threshold {
                GateState::Healthy
            } else {
                GateState::Waiting
            };
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            self.state = if self.consecutive_failures >= self.unhealthy_threshold {
                GateState::TimedOut
            } else if self.seen_success {
                GateState::Degraded
            } else {
                GateState::Waiting
            };
        }
        self.state
    }

    /// Force a timeout once the wait budget is spent.
    pub fn expire(&mut self) {
        if !self.is_terminal() {
            self.state = GateState::TimedOut;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateOutcome {
    Healthy {
        probes: u32,
        elapsed: Duration,
    },
    TimedOut {
        probes: u32,
        consecutive_failures: u32,
        elapsed: Duration,
    },
    Cancelled,
}

impl GateOutcome {
    /// Map to the driver's error for non-healthy outcomes.
    pub fn into_result(self, resource: &ResourceId) -> DeployResult<()> {
        match self {
            Self::Healthy { .. } => Ok(()),
            Self::TimedOut {
                probes,
                consecutive_failures,
                elapsed,
            } => Err(DeployError::ProbeTimeout {
                resource: resource.clone(),
                probes,
                consecutive_failures,
                waited_ms: elapsed.as_millis() as u64,
            }),
            Self::Cancelled => Err(DeployError::Cancelled),
        }
    }
}

pub struct ReadinessGate {
    probe: Arc<dyn Probe>,
    spec: HealthCheckSpec,
}

impl ReadinessGate {
    pub fn new(probe: Arc<dyn Probe>, spec: HealthCheckSpec) -> Self {
        Self { probe, spec }
    }

    /// Poll `url` on the check's interval. Never waits past the budget
    /// `unhealthy_threshold x (interval + timeout)`.
    pub async fn wait(&self, url: &str, cancel: &CancellationToken) -> GateOutcome {
        let start = Instant::now();
        let budget = self.spec.wait_budget();
        let mut counters = GateCounters::new(&self.spec);
        info!(url, budget_secs = budget.as_secs(), "readiness gate waiting");

        loop {
            let timeout = self.spec.timeout();
            let result = tokio::select! {
                r = tokio::time::timeout(timeout, self.probe.probe(url, timeout)) => {
                    r.unwrap_or_else(|_| ProbeResult::Failure {
                        reason: format!("no response within {}ms", timeout.as_millis()),
                    })
                }
                _ = cancel.cancelled() => return self.cancelled(&counters),
            };
            let previous = counters.state;
            let state = counters.observe(result.is_success());
            match &result {
                ProbeResult::Success { status } => {
                    debug!(url, status, probe = counters.probes, "probe ok")
                }
                ProbeResult::Failure { reason } => {
                    debug!(url, reason = %reason, probe = counters.probes, "probe failed")
                }
            }
            if state == GateState::Degraded && previous != GateState::Degraded {
                warn!(url, "service degraded: was passing, now failing");
            }

            if !counters.is_terminal() && start.elapsed() >= budget {
                counters.expire();
            }

            match counters.state {
                GateState::Healthy => {
                    info!(url, probes = counters.probes, "service healthy");
                    return GateOutcome::Healthy {
                        probes: counters.probes,
                        elapsed: start.elapsed(),
                    };
                }
                GateState::TimedOut => {
                    warn!(
                        url,
                        probes = counters.probes,
                        consecutive_failures = counters.consecutive_failures,
                        "readiness gate timed out"
                    );
                    return GateOutcome::TimedOut {
                        probes: counters.probes,
                        consecutive_failures: counters.consecutive_failures,
                        elapsed: start.elapsed(),
                    };
                }
                GateState::Waiting | GateState::Degraded => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.spec.interval()) => {}
                _ = cancel.cancelled() => return self.cancelled(&counters),
            }
        }
    }

    fn cancelled(&self, counters: &GateCounters) -> GateOutcome {
        info!(probes = counters.probes, state = %counters.state, "readiness gate cancelled");
        GateOutcome::Cancelled
    }
}
