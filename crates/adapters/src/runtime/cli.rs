// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`RuntimeBackend`] over a container engine's command line.
//!
//! docker, podman and nerdctl share the same verbs; they differ in how
//! accelerators are requested and in some error wording.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;
use xpu_bench_core::descriptor::FINGERPRINT_LABEL;
use xpu_bench_core::{
    ContainerInspection, ContainerState, DeviceRequest, Engine, RuntimeBackend, RuntimeError,
    ServiceDescriptor,
};

/// Container engine driven through its CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliBackend {
    engine: Engine,
}

impl CliBackend {
    /// Backend for `engine`.
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    async fn run<I, S>(&self, args: I) -> Result<Output, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(self.engine.binary());
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command.output().await?)
    }
}

#[async_trait]
impl RuntimeBackend for CliBackend {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        let output = self
            .run(["info", "--format", "{{json .}}"])
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {}", self.engine, e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable(format!(
                "{}: {}",
                self.engine,
                stderr_message(&output)
            )))
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInspection, RuntimeError> {
        let output = self.run(["container", "inspect", name]).await?;
        if !output.status.success() {
            let message = stderr_message(&output);
            if is_not_found(&message) {
                return Ok(ContainerInspection::absent());
            }
            return Err(RuntimeError::Inspect(message));
        }
        parse_inspect(&output.stdout)
    }

    async fn create(&self, descriptor: &ServiceDescriptor) -> Result<String, RuntimeError> {
        let args = create_args(self.engine, descriptor);
        debug!(engine = %self.engine, args = ?args, "Creating container");
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(RuntimeError::Create(stderr_message(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let output = self.run(["start", name]).await?;
        if output.status.success() {
            return Ok(());
        }
        let message = stderr_message(&output);
        if !is_paused(&message) {
            return Err(RuntimeError::Start(message));
        }

        debug!(container = %name, "Container is paused, unpausing");
        let output = self.run(["unpause", name]).await?;
        if !output.status.success() {
            return Err(RuntimeError::Start(format!(
                "container is paused and unpause failed: {}",
                stderr_message(&output)
            )));
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let output = self.run(["stop", name]).await?;
        if output.status.success() {
            return Ok(());
        }
        let message = stderr_message(&output);
        if is_not_found(&message) {
            debug!(container = %name, "Stop on missing container");
            return Ok(());
        }
        Err(RuntimeError::Stop(message))
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let output = self.run(["rm", name]).await?;
        if output.status.success() {
            return Ok(());
        }
        let message = stderr_message(&output);
        if is_not_found(&message) {
            debug!(container = %name, "Remove on missing container");
            return Ok(());
        }
        Err(RuntimeError::Remove(message))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let tail = tail.to_string();
        let output = self.run(["logs", "--tail", tail.as_str(), name]).await?;
        if !output.status.success() {
            return Err(RuntimeError::Logs(stderr_message(&output)));
        }
        // Services write to both streams; the engine replays them separately.
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(String::from_utf8_lossy(&output.stderr).lines().map(str::to_string));
        Ok(lines)
    }
}

/// Arguments of `<engine> create` for `descriptor`.
pub fn create_args(engine: Engine, descriptor: &ServiceDescriptor) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        descriptor.name().to_string(),
        "-p".to_string(),
        format!("{}:{}", descriptor.port(), descriptor.container_port()),
        "--label".to_string(),
        format!("{}={}", FINGERPRINT_LABEL, descriptor.fingerprint()),
    ];

    for mount in descriptor.mounts() {
        args.push("-v".to_string());
        args.push(mount.to_string());
    }

    args.extend(device_args(engine, descriptor.devices()));

    for (key, value) in descriptor.env() {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    if let Some(size) = descriptor.shm_size() {
        args.push("--shm-size".to_string());
        args.push(size.to_string());
    }

    args.push(descriptor.image().to_string());
    args.extend(descriptor.command().iter().cloned());
    args
}

/// Accelerator flags for `engine`.
///
/// docker and nerdctl take `--gpus`; podman uses CDI device names.
pub fn device_args(engine: Engine, devices: &DeviceRequest) -> Vec<String> {
    match (engine, devices) {
        (_, DeviceRequest::None) => Vec::new(),
        (Engine::Podman, DeviceRequest::All) => {
            vec!["--device".to_string(), "nvidia.com/gpu=all".to_string()]
        }
        (Engine::Podman, DeviceRequest::Ids(ids)) => ids
            .iter()
            .flat_map(|id| ["--device".to_string(), format!("nvidia.com/gpu={}", id)])
            .collect(),
        (_, DeviceRequest::All) => vec!["--gpus".to_string(), "all".to_string()],
        // The quotes keep the comma-separated list in one `--gpus` field.
        (_, DeviceRequest::Ids(_)) => vec!["--gpus".to_string(), format!("\"device={}\"", devices)],
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    state: InspectState,
    #[serde(default)]
    config: Option<InspectConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

/// Parse `<engine> container inspect` output.
pub fn parse_inspect(stdout: &[u8]) -> Result<ContainerInspection, RuntimeError> {
    let entries: Vec<InspectEntry> = serde_json::from_slice(stdout)
        .map_err(|e| RuntimeError::Inspect(format!("unexpected inspect output: {}", e)))?;

    let Some(entry) = entries.into_iter().next() else {
        return Ok(ContainerInspection::absent());
    };

    let state = match entry.state.status.to_ascii_lowercase().as_str() {
        "running" | "restarting" => ContainerState::Running,
        // Not serving; `start` unpauses it.
        "paused" => ContainerState::Stopped,
        _ => ContainerState::Stopped,
    };

    let fingerprint = entry
        .config
        .and_then(|c| c.labels)
        .and_then(|mut labels| labels.remove(FINGERPRINT_LABEL));

    Ok(ContainerInspection {
        state,
        id: Some(entry.id),
        fingerprint,
    })
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

fn is_paused(message: &str) -> bool {
    message.to_ascii_lowercase().contains("paused")
}

fn is_not_found(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("no such container") || message.contains("no such object")
}
