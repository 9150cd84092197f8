// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Service descriptors.
//!
//! A [`ServiceDescriptor`] is the complete, immutable description of one
//! benchmark service: which image to run, under which container name, with
//! which ports, mounts, accelerators and start command, and where its
//! health endpoint lives. Framework differences (vLLM, TensorRT-LLM, SGLang)
//! are expressed purely as descriptor data.
//!
//! # Example
//!
//! ```
//! use xpu_bench_core::{DeviceRequest, ServiceDescriptor};
//!
//! let descriptor = ServiceDescriptor::builder("vllm-qwen", "vllm/vllm-openai:latest")
//!     .port(8000)
//!     .mount("/data/models", "/model")
//!     .devices(DeviceRequest::All)
//!     .command(["--model", "/model/Qwen2.5-7B-Instruct"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(descriptor.service_url("127.0.0.1"), "http://127.0.0.1:8000");
//! ```

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Container label carrying the descriptor fingerprint.
pub const FINGERPRINT_LABEL: &str = "xpu-bench.fingerprint";

/// Default health endpoint path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Default service port.
pub const DEFAULT_PORT: u16 = 8000;

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host.
    pub host_path: String,
    /// Path inside the container.
    pub container_path: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    /// Create a read-write mount.
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }
}

impl FromStr for Mount {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (host, container, read_only) = match parts.as_slice() {
            [host, container] => (*host, *container, false),
            [host, container, "ro"] => (*host, *container, true),
            [host, container, "rw"] => (*host, *container, false),
            _ => return Err(DescriptorError::InvalidMount(s.to_string())),
        };
        if host.is_empty() || container.is_empty() {
            return Err(DescriptorError::InvalidMount(s.to_string()));
        }
        Ok(Self {
            host_path: host.to_string(),
            container_path: container.to_string(),
            read_only,
        })
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_path, self.container_path)?;
        if self.read_only {
            f.write_str(":ro")?;
        }
        Ok(())
    }
}

/// Accelerators requested for the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceRequest {
    /// No accelerators.
    #[default]
    None,
    /// Every accelerator on the host.
    All,
    /// Only the listed device indices.
    Ids(BTreeSet<u32>),
}

impl FromStr for DeviceRequest {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(Self::None),
            "all" => Ok(Self::All),
            list => {
                let ids = list
                    .split(',')
                    .map(|id| id.trim().parse::<u32>())
                    .collect::<Result<BTreeSet<_>, _>>()
                    .map_err(|_| DescriptorError::InvalidDevices(s.to_string()))?;
                Ok(Self::Ids(ids))
            }
        }
    }
}

impl TryFrom<String> for DeviceRequest {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceRequest> for String {
    fn from(value: DeviceRequest) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::All => f.write_str("all"),
            Self::Ids(ids) => {
                let list: Vec<String> = ids.iter().map(u32::to_string).collect();
                f.write_str(&list.join(","))
            }
        }
    }
}

/// Immutable configuration of one benchmark service.
///
/// Construct with [`ServiceDescriptor::builder`]; there are no setters.
/// Deserialized descriptors go through the same validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorFields")]
pub struct ServiceDescriptor {
    name: String,
    image: String,
    port: u16,
    container_port: u16,
    mounts: Vec<Mount>,
    devices: DeviceRequest,
    command: Vec<String>,
    health_path: String,
    #[serde(default)]
    env: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shm_size: Option<String>,
}

impl ServiceDescriptor {
    /// Start building a descriptor for `name` running `image`.
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder::new(name, image)
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image reference.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Host port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port the service listens on inside the container.
    pub fn container_port(&self) -> u16 {
        self.container_port
    }

    /// Volume mounts, in order.
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Accelerator request.
    pub fn devices(&self) -> &DeviceRequest {
        &self.devices
    }

    /// Start command/arguments passed after the image.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Health endpoint path.
    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    /// Environment variables, in order.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Shared memory size (e.g. `16g`), if set.
    pub fn shm_size(&self) -> Option<&str> {
        self.shm_size.as_deref()
    }

    /// Base URL of the service as seen from `host`.
    pub fn service_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.port)
    }

    /// Stable fingerprint of everything that shapes the running container.
    ///
    /// The container name is excluded: two descriptors for the same name
    /// with different fingerprints mean the container must be recreated.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        hash_field(&mut hasher, &self.image);
        hash_field(&mut hasher, &self.port.to_string());
        hash_field(&mut hasher, &self.container_port.to_string());
        for mount in &self.mounts {
            hash_field(&mut hasher, &mount.to_string());
        }
        hash_field(&mut hasher, "--devices");
        hash_field(&mut hasher, &self.devices.to_string());
        hash_field(&mut hasher, "--command");
        for arg in &self.command {
            hash_field(&mut hasher, arg);
        }
        hash_field(&mut hasher, "--env");
        for (key, value) in &self.env {
            hash_field(&mut hasher, key);
            hash_field(&mut hasher, value);
        }
        hash_field(&mut hasher, self.shm_size.as_deref().unwrap_or_default());
        hash_field(&mut hasher, &self.health_path);

        hex::encode(hasher.finalize())
    }
}

#[derive(Deserialize)]
struct DescriptorFields {
    name: String,
    image: String,
    port: u16,
    container_port: u16,
    mounts: Vec<Mount>,
    devices: DeviceRequest,
    command: Vec<String>,
    health_path: String,
    #[serde(default)]
    env: Vec<(String, String)>,
    #[serde(default)]
    shm_size: Option<String>,
}

impl TryFrom<DescriptorFields> for ServiceDescriptor {
    type Error = DescriptorError;

    fn try_from(fields: DescriptorFields) -> Result<Self, Self::Error> {
        ServiceDescriptorBuilder {
            name: fields.name,
            image: fields.image,
            port: fields.port,
            container_port: Some(fields.container_port),
            mounts: fields.mounts,
            devices: fields.devices,
            command: fields.command,
            health_path: fields.health_path,
            env: fields.env,
            shm_size: fields.shm_size,
        }
        .build()
    }
}

// Length-prefixed so adjacent fields cannot run together.
fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Builder for [`ServiceDescriptor`].
#[derive(Debug, Clone)]
pub struct ServiceDescriptorBuilder {
    name: String,
    image: String,
    port: u16,
    container_port: Option<u16>,
    mounts: Vec<Mount>,
    devices: DeviceRequest,
    command: Vec<String>,
    health_path: String,
    env: Vec<(String, String)>,
    shm_size: Option<String>,
}

impl ServiceDescriptorBuilder {
    fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
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

    /// Set the host port (default 8000).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the container port. Defaults to the host port.
    pub fn container_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    /// Add a read-write mount.
    pub fn mount(mut self, host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        self.mounts.push(Mount::new(host_path, container_path));
        self
    }

    /// Add a prepared mount.
    pub fn mount_spec(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Set the accelerator request.
    pub fn devices(mut self, devices: DeviceRequest) -> Self {
        self.devices = devices;
        self
    }

    /// Set the start command/arguments.
    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the health endpoint path (default `/health`).
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the shared memory size.
    pub fn shm_size(mut self, size: impl Into<String>) -> Self {
        self.shm_size = Some(size.into());
        self
    }

    /// Validate and build the descriptor.
    pub fn build(self) -> Result<ServiceDescriptor, DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::MissingField("name"));
        }
        if self.image.trim().is_empty() {
            return Err(DescriptorError::MissingField("image"));
        }
        if self.port == 0 {
            return Err(DescriptorError::ZeroPort("port"));
        }
        let container_port = self.container_port.unwrap_or(self.port);
        if container_port == 0 {
            return Err(DescriptorError::ZeroPort("container_port"));
        }
        if !self.health_path.starts_with('/') {
            return Err(DescriptorError::InvalidHealthPath(self.health_path));
        }

        Ok(ServiceDescriptor {
            name: self.name,
            image: self.image,
            port: self.port,
            container_port,
            mounts: self.mounts,
            devices: self.devices,
            command: self.command,
            health_path: self.health_path,
            env: self.env,
            shm_size: self.shm_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vllm() -> ServiceDescriptorBuilder {
        ServiceDescriptor::builder("vllm-qwen", "vllm/vllm-openai:v0.6.3")
            .port(8000)
            .mount("/data/models", "/model")
            .devices(DeviceRequest::All)
            .command(["--model", "/model/Qwen2.5-7B-Instruct"])
    }

    #[test]
    fn test_builder_defaults() {
        let descriptor = ServiceDescriptor::builder("svc", "image:tag").build().unwrap();
        assert_eq!(descriptor.port(), 8000);
        assert_eq!(descriptor.container_port(), 8000);
        assert_eq!(descriptor.health_path(), "/health");
        assert_eq!(descriptor.devices(), &DeviceRequest::None);
        assert!(descriptor.command().is_empty());
    }

    #[test]
    fn test_builder_rejects_invalid_fields() {
        assert_eq!(
            ServiceDescriptor::builder("", "image").build().unwrap_err(),
            DescriptorError::MissingField("name")
        );
        assert_eq!(
            ServiceDescriptor::builder("svc", " ").build().unwrap_err(),
            DescriptorError::MissingField("image")
        );
        assert_eq!(
            ServiceDescriptor::builder("svc", "image").port(0).build().unwrap_err(),
            DescriptorError::ZeroPort("port")
        );
        assert!(matches!(
            ServiceDescriptor::builder("svc", "image")
                .health_path("health")
                .build(),
            Err(DescriptorError::InvalidHealthPath(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_and_ignores_name() {
        let a = vllm().build().unwrap();
        let b = vllm().build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let renamed = ServiceDescriptor::builder("other-name", "vllm/vllm-openai:v0.6.3")
            .port(8000)
            .mount("/data/models", "/model")
            .devices(DeviceRequest::All)
            .command(["--model", "/model/Qwen2.5-7B-Instruct"])
            .build()
            .unwrap();
        assert_eq!(a.fingerprint(), renamed.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_model_path() {
        let a = vllm().build().unwrap();
        let b = vllm()
            .command(["--model", "/model/Qwen2.5-14B-Instruct"])
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_argument_boundaries() {
        let a = vllm().command(["ab", "c"]).build().unwrap();
        let b = vllm().command(["a", "bc"]).build().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_mount_parsing() {
        let mount: Mount = "/data:/model".parse().unwrap();
        assert_eq!(mount, Mount::new("/data", "/model"));

        let ro: Mount = "/data:/model:ro".parse().unwrap();
        assert!(ro.read_only);
        assert_eq!(ro.to_string(), "/data:/model:ro");

        assert!("/data".parse::<Mount>().is_err());
        assert!(":/model".parse::<Mount>().is_err());
    }

    #[test]
    fn test_device_request_parsing() {
        assert_eq!("none".parse::<DeviceRequest>().unwrap(), DeviceRequest::None);
        assert_eq!("all".parse::<DeviceRequest>().unwrap(), DeviceRequest::All);

        let ids: DeviceRequest = "1, 0".parse().unwrap();
        assert_eq!(ids, DeviceRequest::Ids(BTreeSet::from([0, 1])));
        assert_eq!(ids.to_string(), "0,1");

        assert!("gpu0".parse::<DeviceRequest>().is_err());
    }

    #[test]
    fn test_descriptor_serializes_devices_as_string() {
        let descriptor = vllm().build().unwrap();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["devices"], "all");
        assert_eq!(json["name"], "vllm-qwen");

        let back: ServiceDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn test_deserialization_validates_fields() {
        let valid = serde_json::to_value(vllm().build().unwrap()).unwrap();

        let mut zero_port = valid.clone();
        zero_port["port"] = serde_json::json!(0);
        let err = serde_json::from_value::<ServiceDescriptor>(zero_port).unwrap_err();
        assert!(err.to_string().contains("must be non-zero"));

        let mut relative_health = valid;
        relative_health["health_path"] = serde_json::json!("health");
        assert!(serde_json::from_value::<ServiceDescriptor>(relative_health).is_err());
    }
}
