// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core traits for XPU Bench.
//!
//! [`RuntimeBackend`] abstracts over container engines; [`Dispatcher`]
//! abstracts over the transport that carries one request to the service.
//! Both are object safe and are used behind `Arc<dyn ...>`.

use crate::descriptor::ServiceDescriptor;
use crate::error::RuntimeError;
use crate::request::{RequestResult, RequestSpec};
use crate::state::ContainerInspection;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported container engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Docker
    Docker,
    /// Podman
    Podman,
    /// containerd's nerdctl
    Nerdctl,
}

impl Engine {
    /// Detection order used when none is configured.
    pub const DEFAULT_PRIORITY: [Engine; 3] = [Engine::Docker, Engine::Podman, Engine::Nerdctl];

    /// Name of the engine's CLI binary.
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
            Self::Nerdctl => "nerdctl",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "nerdctl" => Ok(Self::Nerdctl),
            other => Err(format!("unknown container engine: {}", other)),
        }
    }
}

/// Process-lifecycle primitives over one container engine.
///
/// Implementations report engine rejections as [`RuntimeError`] with the
/// engine's message. A missing container is never an error for
/// `inspect`, `stop` or `remove`.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    /// Which engine this backend drives.
    fn engine(&self) -> Engine;

    /// Liveness check of the engine daemon.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Current state of `name`; `Absent` if it does not exist.
    async fn inspect(&self, name: &str) -> Result<ContainerInspection, RuntimeError>;

    /// Create (but do not start) a container. Returns the container ID.
    async fn create(&self, descriptor: &ServiceDescriptor) -> Result<String, RuntimeError>;

    /// Start a stopped container.
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stop a container. Succeeds if it is already stopped or absent.
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    /// Remove a container. Succeeds if it is absent.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// Last `tail` lines of the container's output.
    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError>;
}

/// Sends one request to a running service.
///
/// Never fails: HTTP error statuses are returned as ordinary results and
/// transport failures are recorded in [`RequestResult::error`].
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatch `spec` and normalize the outcome.
    async fn send(&self, spec: &RequestSpec) -> RequestResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parsing_and_binary() {
        assert_eq!("Docker".parse::<Engine>().unwrap(), Engine::Docker);
        assert_eq!("nerdctl".parse::<Engine>().unwrap().binary(), "nerdctl");
        assert!("lxc".parse::<Engine>().is_err());
        assert_eq!(Engine::Podman.to_string(), "podman");
    }

    #[test]
    fn test_default_priority_prefers_docker() {
        assert_eq!(Engine::DEFAULT_PRIORITY[0], Engine::Docker);
        assert_eq!(Engine::DEFAULT_PRIORITY.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_reports_engine() {
        let mut backend = MockRuntimeBackend::new();
        backend.expect_engine().return_const(Engine::Podman);
        backend
            .expect_inspect()
            .returning(|_| Ok(ContainerInspection::absent()));

        assert_eq!(backend.engine(), Engine::Podman);
        let inspection = backend.inspect("missing").await.unwrap();
        assert_eq!(inspection, ContainerInspection::absent());
    }
}
