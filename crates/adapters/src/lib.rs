// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Adapters between XPU Bench and the outside world.
//!
//! - [`runtime`] - Container engines driven through their CLIs, and detection
//! - [`lifecycle`] - Bringing a service up to a healthy state and back down
//! - [`http`] - The `reqwest` request dispatcher
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xpu_bench_adapters::{detect, HttpDispatcher, LifecycleManager};
//! use xpu_bench_core::{Engine, ServiceDescriptor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = ServiceDescriptor::builder("vllm", "vllm/vllm-openai:latest")
//!     .port(8000)
//!     .build()?;
//!
//! let backend = detect(&Engine::DEFAULT_PRIORITY).await?;
//! let dispatcher = Arc::new(HttpDispatcher::new(descriptor.service_url("127.0.0.1"))?);
//! let manager = LifecycleManager::new(backend, dispatcher);
//!
//! let handle = manager.ensure_running(&descriptor).await?;
//! println!("ready at {}", handle.service_url);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod http;
pub mod lifecycle;
pub mod runtime;

pub use http::HttpDispatcher;
pub use lifecycle::{LifecycleManager, ServiceHandle, ServiceStatus, TeardownOutcome};
pub use runtime::{detect, detect_from, CliBackend};
