// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Container engine backends and detection.

pub mod cli;

pub use cli::CliBackend;

use std::sync::Arc;
use tracing::{debug, info};
use xpu_bench_core::{Engine, LifecycleError, RuntimeBackend};

/// Try `engines` in order and return the first that responds.
pub async fn detect(engines: &[Engine]) -> Result<Arc<dyn RuntimeBackend>, LifecycleError> {
    let candidates = engines
        .iter()
        .map(|engine| Arc::new(CliBackend::new(*engine)) as Arc<dyn RuntimeBackend>)
        .collect();
    detect_from(candidates).await
}

/// Try arbitrary candidate backends in order.
///
/// Fails with [`LifecycleError::RuntimeUnavailable`] listing every liveness
/// failure when none respond.
pub async fn detect_from(
    candidates: Vec<Arc<dyn RuntimeBackend>>,
) -> Result<Arc<dyn RuntimeBackend>, LifecycleError> {
    let mut failures = Vec::with_capacity(candidates.len());

    for backend in candidates {
        match backend.ping().await {
            Ok(()) => {
                info!(engine = %backend.engine(), "Detected container engine");
                return Ok(backend);
            }
            Err(e) => {
                debug!(engine = %backend.engine(), error = %e, "Container engine did not respond");
                failures.push(e.to_string());
            }
        }
    }

    if failures.is_empty() {
        return Err(LifecycleError::RuntimeUnavailable(
            "no container engines configured".to_string(),
        ));
    }
    Err(LifecycleError::RuntimeUnavailable(failures.join("; ")))
}
