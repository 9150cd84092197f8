// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Benchmark execution and reporting for XPU Bench.
//!
//! The [`BenchmarkRunner`] drives requests through any
//! [`Dispatcher`](xpu_bench_core::Dispatcher), sequentially or from a pool
//! of workers, and aggregates the outcomes into a [`BenchmarkReport`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use xpu_bench_benchmarks::{BenchmarkRunner, Generation, ReportWriter};
//! use xpu_bench_core::{Dispatcher, RequestKind, ServiceDescriptor};
//!
//! # async fn example(dispatcher: Arc<dyn Dispatcher>) -> std::io::Result<()> {
//! let service = ServiceDescriptor::builder("vllm", "vllm/vllm-openai:latest")
//!     .build()
//!     .expect("valid descriptor");
//! let generation = Generation {
//!     model: "Qwen2.5-7B-Instruct".to_string(),
//!     max_tokens: 100,
//!     temperature: 0.7,
//!     timeout: Duration::from_secs(60),
//! };
//!
//! let runner = BenchmarkRunner::new(dispatcher, service);
//! let report = runner
//!     .run_concurrent("chat", generation.indexed_requests(RequestKind::Chat), 100, 8)
//!     .await;
//!
//! ReportWriter::new("reports").write_benchmarks(&[report])?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`runner`] - Sequential and concurrent runs
//! - [`result`] - Per-request outcomes and the aggregated report
//! - [`latency`] - Latency distribution statistics
//! - [`scenario`] - Fixed qualitative scenarios
//! - [`smoke`] - Health/models/chat/completion smoke test
//! - [`telemetry`] - Accelerator sampling during runs
//! - [`io`] - Report persistence
//! - [`markdown`] - Markdown rendering

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod io;
pub mod latency;
pub mod markdown;
pub mod result;
pub mod runner;
pub mod scenario;
pub mod smoke;
pub mod telemetry;

pub use io::ReportWriter;
pub use latency::LatencyDistribution;
pub use result::{throughput, BenchmarkReport, FailureBreakdown, RequestOutcome};
pub use runner::{BenchmarkRunner, Generation, ProgressHook};
pub use scenario::{run_scenarios, Scenario};
pub use smoke::{run_smoke_test, CheckResult, CheckStatus, SmokeReport, SmokeResults};
pub use telemetry::{detect_source, HardwareKind, TelemetrySource, TelemetrySummary};
