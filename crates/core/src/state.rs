// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Container and service lifecycle states.
//!
//! [`ContainerState`] is what the engine reports right now; it is always
//! queried fresh and never cached. [`LifecycleState`] is the richer state
//! machine the lifecycle manager walks through while bringing a service up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default number of health checks before giving up.
pub const DEFAULT_HEALTH_ATTEMPTS: u32 = 30;

/// Default pause between health checks.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(2);

/// Default timeout of a single health request.
pub const DEFAULT_HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Container state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// No container with this name exists.
    Absent,
    /// The container exists but is not running.
    Stopped,
    /// The container is running.
    Running,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Stopped => "stopped",
            Self::Running => "running",
        };
        f.write_str(s)
    }
}

/// Result of inspecting a container by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInspection {
    /// Current state.
    pub state: ContainerState,
    /// Engine-assigned container ID, when the container exists.
    pub id: Option<String>,
    /// Descriptor fingerprint label recorded at create time, if any.
    pub fingerprint: Option<String>,
}

impl ContainerInspection {
    /// No such container.
    pub fn absent() -> Self {
        Self {
            state: ContainerState::Absent,
            id: None,
            fingerprint: None,
        }
    }

    /// An existing, stopped container.
    pub fn stopped(id: impl Into<String>) -> Self {
        Self {
            state: ContainerState::Stopped,
            id: Some(id.into()),
            fingerprint: None,
        }
    }

    /// A running container.
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            state: ContainerState::Running,
            id: Some(id.into()),
            fingerprint: None,
        }
    }

    /// Attach the fingerprint label.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// States of the service lifecycle state machine.
///
/// ```text
/// Absent -> Creating -> Stopped -> Starting -> HealthPending -> Healthy -> Stopping -> Absent
/// ```
///
/// `Failed` is terminal and reachable from any transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No container.
    Absent,
    /// Create issued.
    Creating,
    /// Container exists but is not running.
    Stopped,
    /// Start issued.
    Starting,
    /// Running, readiness not yet confirmed.
    HealthPending,
    /// Running and the health endpoint reports ready.
    Healthy,
    /// Stop/remove issued.
    Stopping,
    /// A transition failed.
    Failed,
}

impl From<ContainerState> for LifecycleState {
    fn from(state: ContainerState) -> Self {
        match state {
            ContainerState::Absent => Self::Absent,
            ContainerState::Stopped => Self::Stopped,
            ContainerState::Running => Self::HealthPending,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::HealthPending => "running (health pending)",
            Self::Healthy => "running (healthy)",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A container engine operation, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Query state.
    Inspect,
    /// Create container.
    Create,
    /// Start container.
    Start,
    /// Stop container.
    Stop,
    /// Remove container.
    Remove,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inspect => "inspect",
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Bounded health polling policy.
///
/// The bound is an attempt count, not a wall-clock deadline: a slow
/// individual health request (up to `request_timeout`) extends the total
/// wait beyond `attempts * interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Maximum number of health checks.
    pub attempts: u32,
    /// Pause between consecutive checks.
    pub interval: Duration,
    /// Timeout of each health request.
    pub request_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_HEALTH_ATTEMPTS,
            interval: DEFAULT_HEALTH_INTERVAL,
            request_timeout: DEFAULT_HEALTH_REQUEST_TIMEOUT,
        }
    }
}

impl HealthPolicy {
    /// Upper bound on time spent sleeping between checks.
    pub fn sleep_budget(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}
