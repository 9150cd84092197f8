// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for XPU Bench.
//!
//! Lifecycle errors are fatal to the invoking operation and carry enough
//! context (transition, last known state, log tail) for manual recovery.
//! Per-request failures are not errors at this level; see
//! [`crate::request::RequestError`], which is recorded as data.

use crate::state::{LifecycleState, Transition};
use thiserror::Error;

/// Errors reported by a container engine backend.
///
/// Each variant carries the engine's own message so users can act on it.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No container engine responded to the liveness check.
    #[error("No container runtime available (tried: {0})")]
    Unavailable(String),

    /// Inspecting a container failed for a reason other than "not found".
    #[error("Inspect failed: {0}")]
    Inspect(String),

    /// The engine rejected container creation.
    #[error("Create failed: {0}")]
    Create(String),

    /// The engine rejected container start.
    #[error("Start failed: {0}")]
    Start(String),

    /// The engine rejected container stop.
    #[error("Stop failed: {0}")]
    Stop(String),

    /// The engine rejected container removal.
    #[error("Remove failed: {0}")]
    Remove(String),

    /// Log retrieval failed.
    #[error("Logs failed: {0}")]
    Logs(String),

    /// The engine binary could not be executed.
    #[error("Failed to run container engine: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building a [`crate::ServiceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// A required field was empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A port was zero.
    #[error("Invalid port for {0}: must be non-zero")]
    ZeroPort(&'static str),

    /// A mount specification could not be parsed.
    #[error("Invalid mount '{0}': expected HOST:CONTAINER[:ro]")]
    InvalidMount(String),

    /// A device request could not be parsed.
    #[error("Invalid device request '{0}': expected none, all, or comma-separated ids")]
    InvalidDevices(String),

    /// The health path was not absolute.
    #[error("Invalid health path '{0}': must start with '/'")]
    InvalidHealthPath(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configured service is not a valid descriptor.
    #[error("Invalid service configuration: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// Errors raised by the lifecycle manager.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No container engine was detected on this host.
    #[error("No container runtime available: {0}")]
    RuntimeUnavailable(String),

    /// A state transition was rejected by the engine.
    #[error("{transition} failed for container '{container}' (last known state: {last_state}): {source}")]
    Transition {
        /// Container name.
        container: String,
        /// The transition that failed.
        transition: Transition,
        /// Last state observed before the failure.
        last_state: LifecycleState,
        /// Underlying engine error.
        #[source]
        source: RuntimeError,
    },

    /// The service never reported ready within the attempt budget.
    ///
    /// The container is left in place for postmortem inspection.
    #[error("Service '{container}' not healthy after {attempts} health checks (last observation: {last_observation})")]
    HealthCheckTimeout {
        /// Container name.
        container: String,
        /// Number of health checks issued.
        attempts: u32,
        /// Description of the last health response or failure.
        last_observation: String,
        /// Tail of the container logs.
        logs: Vec<String>,
    },
}

impl LifecycleError {
    /// Build a transition error.
    pub fn transition(
        container: impl Into<String>,
        transition: Transition,
        last_state: LifecycleState,
        source: RuntimeError,
    ) -> Self {
        Self::Transition {
            container: container.into(),
            transition,
            last_state,
            source,
        }
    }

    /// Last lifecycle state known when the error occurred.
    pub fn last_state(&self) -> LifecycleState {
        match self {
            Self::RuntimeUnavailable(_) => LifecycleState::Failed,
            Self::Transition { last_state, .. } => *last_state,
            Self::HealthCheckTimeout { .. } => LifecycleState::HealthPending,
        }
    }

    /// Container log tail collected for diagnostics, if any.
    pub fn logs(&self) -> &[String] {
        match self {
            Self::HealthCheckTimeout { logs, .. } => logs,
            _ => &[],
        }
    }

    /// Whether a caller-side retry may help.
    ///
    /// Only engine communication failures qualify; a health check timeout
    /// already consumed its whole budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_message_has_context() {
        let err = LifecycleError::transition(
            "vllm-qwen",
            Transition::Start,
            LifecycleState::Stopped,
            RuntimeError::Start("port is already allocated".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("start"));
        assert!(msg.contains("vllm-qwen"));
        assert!(msg.contains("stopped"));
        assert!(msg.contains("port is already allocated"));
        assert!(err.is_retryable());
        assert_eq!(err.last_state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_health_timeout_keeps_logs_and_is_not_retryable() {
        let err = LifecycleError::HealthCheckTimeout {
            container: "sglang".to_string(),
            attempts: 30,
            last_observation: "HTTP 503".to_string(),
            logs: vec!["loading weights".to_string()],
        };
        assert!(!err.is_retryable());
        assert_eq!(err.logs(), &["loading weights".to_string()]);
        assert_eq!(err.last_state(), LifecycleState::HealthPending);
    }
}
