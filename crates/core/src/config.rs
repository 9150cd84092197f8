// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layered configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional configuration file (YAML, TOML or JSON, by extension)
//! 3. Environment variables prefixed with `XPU_BENCH__`, using `__` as the
//!    nesting separator, e.g. `XPU_BENCH__SERVICE__PORT=8001`
//!
//! A `.env` file in the working directory is loaded into the process
//! environment first, if present.
//!
//! # Example
//!
//! ```yaml
//! service:
//!   name: vllm-qwen
//!   image: vllm/vllm-openai:v0.6.3
//!   port: 8000
//!   mounts: ["/data/models:/model:ro"]
//!   devices: "0,1"
//!   command: ["--model", "/model/Qwen2.5-7B-Instruct", "--served-model-name", "Qwen2.5-7B-Instruct"]
//!   env: ["HF_HUB_OFFLINE=1"]
//! benchmark:
//!   model: Qwen2.5-7B-Instruct
//!   requests: 100
//!   concurrency: 8
//! ```

use crate::descriptor::{DeviceRequest, Mount, ServiceDescriptor, DEFAULT_HEALTH_PATH, DEFAULT_PORT};
use crate::error::{ConfigError, DescriptorError};
use crate::request::{RequestKind, DEFAULT_REQUEST_TIMEOUT};
use crate::state::{
    HealthPolicy, DEFAULT_HEALTH_ATTEMPTS, DEFAULT_HEALTH_INTERVAL, DEFAULT_HEALTH_REQUEST_TIMEOUT,
};
use crate::traits::Engine;
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "XPU_BENCH";

/// Default report directory.
pub const DEFAULT_OUTPUT_DIR: &str = "reports";

/// Complete XPU Bench configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Service to run.
    pub service: ServiceConfig,
    /// Health polling.
    pub health: HealthConfig,
    /// Benchmark workload.
    pub benchmark: BenchmarkConfig,
    /// Container engine selection.
    pub runtime: RuntimeConfig,
    /// Report directory.
    pub output_dir: Option<PathBuf>,
}

/// `service` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Host the service is reached on.
    pub host: String,
    /// Host port.
    pub port: u16,
    /// Container port; defaults to `port`.
    pub container_port: Option<u16>,
    /// Mounts as `HOST:CONTAINER[:ro]`.
    pub mounts: Vec<String>,
    /// `none`, `all`, or comma-separated device ids.
    pub devices: DeviceRequest,
    /// Start command/arguments.
    pub command: Vec<String>,
    /// Health endpoint path.
    pub health_path: String,
    /// Environment as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Shared memory size.
    pub shm_size: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "xpu-bench-service".to_string(),
            image: String::new(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            container_port: None,
            mounts: Vec::new(),
            devices: DeviceRequest::None,
            command: Vec::new(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            env: Vec::new(),
            shm_size: None,
        }
    }
}

impl ServiceConfig {
    /// Build the immutable descriptor for this service.
    pub fn descriptor(&self) -> Result<ServiceDescriptor, DescriptorError> {
        let mut builder = ServiceDescriptor::builder(&self.name, &self.image)
            .port(self.port)
            .devices(self.devices.clone())
            .command(self.command.iter().cloned())
            .health_path(&self.health_path);

        if let Some(port) = self.container_port {
            builder = builder.container_port(port);
        }
        for mount in &self.mounts {
            builder = builder.mount_spec(mount.parse::<Mount>()?);
        }
        for pair in &self.env {
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => builder = builder.env(key, value),
                _ => builder = builder.env(pair, ""),
            }
        }
        if let Some(size) = &self.shm_size {
            builder = builder.shm_size(size);
        }

        builder.build()
    }
}

/// `health` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Maximum health checks.
    pub attempts: u32,
    /// Seconds between checks.
    pub interval_secs: u64,
    /// Timeout of each check, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_HEALTH_ATTEMPTS,
            interval_secs: DEFAULT_HEALTH_INTERVAL.as_secs(),
            request_timeout_secs: DEFAULT_HEALTH_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl HealthConfig {
    /// Polling policy for the lifecycle manager.
    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            attempts: self.attempts,
            interval: Duration::from_secs(self.interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// `benchmark` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Served model name sent in request bodies.
    pub model: String,
    /// Number of requests per run.
    pub requests: usize,
    /// Worker count; 1 runs sequentially.
    pub concurrency: usize,
    /// Generation limit per request.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Overall run deadline in seconds.
    pub deadline_secs: Option<u64>,
    /// Generation endpoint.
    pub kind: RequestKind,
    /// Sample accelerator telemetry during runs when a vendor tool is found.
    pub telemetry: bool,
    /// Pause between telemetry samples in milliseconds.
    pub telemetry_interval_ms: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            requests: 10,
            concurrency: 1,
            max_tokens: 100,
            temperature: 0.7,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            deadline_secs: None,
            kind: RequestKind::Chat,
            telemetry: true,
            telemetry_interval_ms: 1000,
        }
    }
}

impl BenchmarkConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Overall run deadline, if configured.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Pause between telemetry samples, at least 100ms.
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(100))
    }
}

/// `runtime` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engines to try, in priority order.
    pub engines: Vec<Engine>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engines: Engine::DEFAULT_PRIORITY.to_vec(),
        }
    }
}

impl BenchConfig {
    /// Load configuration from defaults, `path`, `.env` and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "Loaded .env file");
        }
        Self::from_sources(path, environment())
    }

    fn from_sources(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: BenchConfig = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Descriptor of the configured service.
    pub fn descriptor(&self) -> Result<ServiceDescriptor, ConfigError> {
        Ok(self.service.descriptor()?)
    }

    /// Report directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = BenchConfig::from_sources(None, env_from(&[])).unwrap();
        assert_eq!(config.service.port, 8000);
        assert_eq!(config.service.health_path, "/health");
        assert_eq!(config.health.policy(), HealthPolicy::default());
        assert_eq!(config.benchmark.requests, 10);
        assert_eq!(config.benchmark.kind, RequestKind::Chat);
        assert_eq!(config.runtime.engines, Engine::DEFAULT_PRIORITY.to_vec());
        assert_eq!(config.output_dir(), PathBuf::from("reports"));
        assert!(config.benchmark.telemetry);
        assert_eq!(config.benchmark.telemetry_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_service_has_no_image() {
        let config = BenchConfig::default();
        assert!(matches!(
            config.descriptor(),
            Err(ConfigError::Descriptor(DescriptorError::MissingField("image")))
        ));
    }

    #[test]
    fn test_yaml_file_and_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
service:
  name: sglang-qwen
  image: lmsysorg/sglang:latest
  port: 30000
  mounts: ["/data/models:/model:ro"]
  devices: "0,1"
  command: ["python3", "-m", "sglang.launch_server", "--model-path", "/model"]
  env: ["HF_HUB_OFFLINE=1"]
benchmark:
  model: Qwen2.5-7B-Instruct
  concurrency: 4
  kind: completion
runtime:
  engines: [podman, docker]
"#
        )
        .unwrap();

        let env = env_from(&[
            ("XPU_BENCH__SERVICE__PORT", "30001"),
            ("XPU_BENCH__BENCHMARK__TELEMETRY", "false"),
        ]);
        let config = BenchConfig::from_sources(Some(file.path()), env).unwrap();

        assert_eq!(config.service.port, 30001);
        assert_eq!(config.benchmark.concurrency, 4);
        assert_eq!(config.benchmark.kind, RequestKind::Completion);
        assert!(!config.benchmark.telemetry);
        assert_eq!(config.runtime.engines, vec![Engine::Podman, Engine::Docker]);

        let descriptor = config.descriptor().unwrap();
        assert_eq!(descriptor.name(), "sglang-qwen");
        assert_eq!(descriptor.port(), 30001);
        assert_eq!(descriptor.container_port(), 30001);
        assert_eq!(descriptor.mounts()[0].container_path, "/model");
        assert!(descriptor.mounts()[0].read_only);
        assert_eq!(descriptor.devices().to_string(), "0,1");
        assert_eq!(descriptor.env()[0], ("HF_HUB_OFFLINE".to_string(), "1".to_string()));
        assert_eq!(descriptor.command()[2], "sglang.launch_server");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = BenchConfig::from_sources(
            Some(Path::new("/nonexistent/xpu-bench.yaml")),
            env_from(&[]),
        );
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
