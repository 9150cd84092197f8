// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core types and traits for XPU Bench.
//!
//! This crate holds everything the lifecycle manager, the benchmark runner
//! and the CLI agree on:
//!
//! - [`descriptor`] - The immutable [`ServiceDescriptor`] for one benchmark service
//! - [`state`] - Container and lifecycle states, health polling policy
//! - [`request`] - Request/response contracts for the service's HTTP API
//! - [`traits`] - The [`RuntimeBackend`] and [`Dispatcher`] seams
//! - [`error`] - Error taxonomy shared across crates
//! - [`config`] - Layered configuration loading

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod request;
pub mod state;
pub mod traits;

pub use crate::config::BenchConfig;
pub use descriptor::{DeviceRequest, Mount, ServiceDescriptor};
pub use error::{ConfigError, DescriptorError, LifecycleError, RuntimeError};
pub use request::{
    HttpMethod, ParsedResponse, RequestError, RequestKind, RequestResult, RequestSpec,
    ResponseShape,
};
pub use state::{ContainerInspection, ContainerState, HealthPolicy, LifecycleState, Transition};
pub use traits::{Dispatcher, Engine, RuntimeBackend};

#[cfg(any(test, feature = "mocks"))]
pub use traits::{MockDispatcher, MockRuntimeBackend};
