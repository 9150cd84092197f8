// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Service lifecycle manager.
//!
//! Drives one container through
//! `Absent -> Creating -> Stopped -> Starting -> HealthPending -> Healthy`
//! and back down to `Absent`. Container state is always queried fresh from
//! the engine; nothing is cached between calls.
//!
//! [`LifecycleManager::ensure_running`] is idempotent: a container that is
//! already running and healthy is returned as-is, never recreated or
//! restarted. Engine failures are reported with the failing transition and
//! the last known state and are not retried here.

use std::sync::Arc;
use tracing::{debug, info, warn};
use xpu_bench_core::{
    ContainerInspection, ContainerState, Dispatcher, Engine, HealthPolicy, LifecycleError,
    LifecycleState, RequestSpec, ResponseShape, RuntimeBackend, ServiceDescriptor, Transition,
};

/// Log lines collected when a service fails to become healthy.
pub const DIAGNOSTIC_LOG_LINES: usize = 50;

/// A running, health-verified service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Container name.
    pub container: String,
    /// Container ID, when the engine reported one.
    pub container_id: Option<String>,
    /// Base URL of the service.
    pub service_url: String,
    /// Always [`LifecycleState::Healthy`].
    pub state: LifecycleState,
    /// The container already existed and was reused.
    pub reused: bool,
    /// Health checks issued before the service reported ready.
    pub health_checks: u32,
}

/// Result of a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The container was stopped and removed.
    Removed,
    /// There was nothing to remove.
    AlreadyAbsent,
}

/// Read-only view of a service's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Container state as reported by the engine.
    pub state: ContainerState,
    /// Container ID, if the container exists.
    pub container_id: Option<String>,
    /// Base URL, if the container is running.
    pub service_url: Option<String>,
    /// The container was created from a different descriptor.
    pub stale: bool,
}

/// Brings services up and down on one container engine.
pub struct LifecycleManager {
    backend: Arc<dyn RuntimeBackend>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: HealthPolicy,
    host: String,
}

impl LifecycleManager {
    /// Create a manager; `dispatcher` must target the service's base URL.
    pub fn new(backend: Arc<dyn RuntimeBackend>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            backend,
            dispatcher,
            policy: HealthPolicy::default(),
            host: "127.0.0.1".to_string(),
        }
    }

    /// Override the health polling policy.
    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Host the service is reached on, used for reported URLs.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Engine this manager drives.
    pub fn engine(&self) -> Engine {
        self.backend.engine()
    }

    /// Underlying runtime backend.
    pub fn backend(&self) -> &Arc<dyn RuntimeBackend> {
        &self.backend
    }

    /// Bring the service to a running, healthy state.
    ///
    /// On health check exhaustion the container is left in place and the
    /// error carries the tail of its logs.
    pub async fn ensure_running(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, LifecycleError> {
        let name = descriptor.name();
        let inspection = self.inspect(name).await?;
        let mut state = inspection.state;
        let mut container_id = inspection.id.clone();

        info!(container = %name, state = %state, engine = %self.engine(), "Ensuring service is running");

        if state != ContainerState::Absent && self.is_stale(descriptor, &inspection) {
            warn!(
                container = %name,
                state = %state,
                "Container was created from a different configuration, recreating"
            );
            self.stop_and_remove(name, state).await?;
            state = ContainerState::Absent;
            container_id = None;
        }

        let reused = state != ContainerState::Absent;
        let mut first_failure = None;

        match state {
            ContainerState::Running => match self.check_health(descriptor).await {
                Ok(()) => {
                    info!(container = %name, "Service already running and healthy");
                    return Ok(self.handle(descriptor, container_id, true, 1));
                }
                Err(observation) => {
                    debug!(container = %name, observation = %observation, "Service running but not ready, polling health");
                    first_failure = Some(observation);
                }
            },
            ContainerState::Stopped => {
                self.start(name).await?;
            }
            ContainerState::Absent => {
                info!(container = %name, image = %descriptor.image(), "Creating container");
                let id = self.backend.create(descriptor).await.map_err(|e| {
                    LifecycleError::transition(name, Transition::Create, LifecycleState::Creating, e)
                })?;
                debug!(container = %name, id = %id, "Container created");
                container_id = Some(id);
                self.start(name).await?;
            }
        }

        let checks = self.wait_healthy(descriptor, first_failure).await?;
        info!(container = %name, checks, "Service is healthy");
        Ok(self.handle(descriptor, container_id, reused, checks))
    }

    /// Stop and remove the service's container; succeeds if it is absent.
    pub async fn teardown(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<TeardownOutcome, LifecycleError> {
        let name = descriptor.name();
        let inspection = self.inspect(name).await?;

        if inspection.state == ContainerState::Absent {
            info!(container = %name, "Container already absent, nothing to tear down");
            return Ok(TeardownOutcome::AlreadyAbsent);
        }

        self.stop_and_remove(name, inspection.state).await?;
        info!(container = %name, "Container removed");
        Ok(TeardownOutcome::Removed)
    }

    /// Current state of the service's container. Never changes it.
    pub async fn status(&self, descriptor: &ServiceDescriptor) -> Result<ServiceStatus, LifecycleError> {
        let inspection = self.inspect(descriptor.name()).await?;
        let stale =
            inspection.state != ContainerState::Absent && self.is_stale(descriptor, &inspection);

        Ok(ServiceStatus {
            service_url: (inspection.state == ContainerState::Running)
                .then(|| descriptor.service_url(&self.host)),
            state: inspection.state,
            container_id: inspection.id,
            stale,
        })
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInspection, LifecycleError> {
        self.backend
            .inspect(name)
            .await
            .map_err(|e| LifecycleError::transition(name, Transition::Inspect, LifecycleState::Failed, e))
    }

    /// A labelled container whose fingerprint differs from `descriptor`.
    ///
    /// Unlabelled containers were not created by this tool and are reused.
    fn is_stale(&self, descriptor: &ServiceDescriptor, inspection: &ContainerInspection) -> bool {
        match inspection.fingerprint.as_deref() {
            Some(fingerprint) => fingerprint != descriptor.fingerprint(),
            None => {
                warn!(container = %descriptor.name(), "Container has no fingerprint label, reusing as-is");
                false
            }
        }
    }

    async fn start(&self, name: &str) -> Result<(), LifecycleError> {
        info!(container = %name, "Starting container");
        self.backend
            .start(name)
            .await
            .map_err(|e| LifecycleError::transition(name, Transition::Start, LifecycleState::Starting, e))
    }

    async fn stop_and_remove(&self, name: &str, from: ContainerState) -> Result<(), LifecycleError> {
        info!(container = %name, state = %from, "Stopping container");
        self.backend
            .stop(name)
            .await
            .map_err(|e| LifecycleError::transition(name, Transition::Stop, LifecycleState::Stopping, e))?;
        self.backend
            .remove(name)
            .await
            .map_err(|e| LifecycleError::transition(name, Transition::Remove, LifecycleState::Stopping, e))
    }

    /// Poll the health endpoint; returns the number of checks issued.
    ///
    /// `first_failure` is the observation of a check already issued by the
    /// caller, which counts as attempt 1.
    async fn wait_healthy(
        &self,
        descriptor: &ServiceDescriptor,
        first_failure: Option<String>,
    ) -> Result<u32, LifecycleError> {
        let name = descriptor.name();
        let attempts = self.policy.attempts.max(1);
        let (issued, mut last_observation) = match first_failure {
            Some(observation) => (1, observation),
            None => (0, String::from("no health check issued")),
        };

        for attempt in issued + 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.interval).await;
            }
            match self.check_health(descriptor).await {
                Ok(()) => return Ok(attempt),
                Err(observation) => {
                    debug!(container = %name, attempt, attempts, observation = %observation, "Service not ready");
                    last_observation = observation;
                }
            }
        }

        warn!(
            container = %name,
            attempts,
            last_observation = %last_observation,
            "Service did not become healthy, leaving container for inspection"
        );

        Err(LifecycleError::HealthCheckTimeout {
            container: name.to_string(),
            attempts,
            last_observation,
            logs: self.collect_logs(name).await,
        })
    }

    /// One health check: 200 with a `status` field, else a description of
    /// what was observed.
    async fn check_health(&self, descriptor: &ServiceDescriptor) -> Result<(), String> {
        let spec = RequestSpec::health(descriptor.health_path()).with_timeout(self.policy.request_timeout);
        let result = self.dispatcher.send(&spec).await;

        if let Some(error) = &result.error {
            return Err(error.to_string());
        }
        if !result.is_success() {
            return Err(result.describe());
        }
        match ResponseShape::Health.parse(&result.body) {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn collect_logs(&self, name: &str) -> Vec<String> {
        match self.backend.logs(name, DIAGNOSTIC_LOG_LINES).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(container = %name, error = %e, "Failed to collect container logs");
                vec![format!("<logs unavailable: {}>", e)]
            }
        }
    }

    fn handle(
        &self,
        descriptor: &ServiceDescriptor,
        container_id: Option<String>,
        reused: bool,
        health_checks: u32,
    ) -> ServiceHandle {
        ServiceHandle {
            container: descriptor.name().to_string(),
            container_id,
            service_url: descriptor.service_url(&self.host),
            state: LifecycleState::Healthy,
            reused,
            health_checks,
        }
    }
}
