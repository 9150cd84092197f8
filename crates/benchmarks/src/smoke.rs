// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Smoke test: one health, models, chat and completion check each.
//!
//! The resulting [`SmokeReport`] is the artifact report consumers read, so
//! its JSON field names are fixed.

use crate::runner::{dispatch, Generation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use xpu_bench_core::{Dispatcher, Engine, RequestKind, RequestSpec, ServiceDescriptor};

const SMOKE_PROMPT: &str = "Reply with a single short sentence confirming you are online.";

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed.
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// Result of one smoke check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// pass / fail
    pub status: CheckStatus,
    /// Response text on success, failure description otherwise.
    pub log: String,
}

impl CheckResult {
    /// Whether the check passed.
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// The four smoke checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeResults {
    /// Health endpoint.
    pub health: CheckResult,
    /// `/v1/models`.
    pub models: CheckResult,
    /// `/v1/chat/completions`.
    pub chat: CheckResult,
    /// `/v1/completions`.
    pub completion: CheckResult,
}

impl SmokeResults {
    fn all_passed(&self) -> bool {
        [&self.health, &self.models, &self.chat, &self.completion]
            .iter()
            .all(|check| check.passed())
    }
}

/// Smoke test report artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokeReport {
    /// When the test ran.
    pub test_date: DateTime<Utc>,
    /// Container engine that hosts the service.
    pub container_tool: Engine,
    /// Service image.
    pub image: String,
    /// Host port of the service.
    pub port: u16,
    /// Per-check results.
    pub results: SmokeResults,
    /// `pass` iff all four checks pass.
    pub overall_status: CheckStatus,
}

impl SmokeReport {
    /// Assemble a report; the overall status is derived from `results`.
    pub fn new(engine: Engine, descriptor: &ServiceDescriptor, results: SmokeResults) -> Self {
        let overall_status = if results.all_passed() {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        Self {
            test_date: Utc::now(),
            container_tool: engine,
            image: descriptor.image().to_string(),
            port: descriptor.port(),
            results,
            overall_status,
        }
    }

    /// Whether every check passed.
    pub fn passed(&self) -> bool {
        self.overall_status == CheckStatus::Pass
    }
}

/// Run the four checks once each against a running service.
pub async fn run_smoke_test(
    dispatcher: &dyn Dispatcher,
    descriptor: &ServiceDescriptor,
    engine: Engine,
    generation: &Generation,
) -> SmokeReport {
    info!(container = %descriptor.name(), "Running smoke test");

    let health = check(dispatcher, "health", RequestSpec::health(descriptor.health_path())).await;
    let models = check(dispatcher, "models", RequestSpec::models()).await;
    let chat = check(dispatcher, "chat", generation.request(RequestKind::Chat, SMOKE_PROMPT)).await;
    let completion = check(
        dispatcher,
        "completion",
        generation.request(RequestKind::Completion, SMOKE_PROMPT),
    )
    .await;

    let report = SmokeReport::new(
        engine,
        descriptor,
        SmokeResults {
            health,
            models,
            chat,
            completion,
        },
    );
    info!(container = %descriptor.name(), overall = %report.overall_status, "Smoke test finished");
    report
}

async fn check(dispatcher: &dyn Dispatcher, name: &str, spec: RequestSpec) -> CheckResult {
    let outcome = dispatch(dispatcher, 1, &spec, None).await;
    if outcome.is_success() {
        CheckResult {
            status: CheckStatus::Pass,
            log: outcome.text.unwrap_or_default(),
        }
    } else {
        warn!(check = name, detail = %outcome.describe(), "Smoke check failed");
        let mut log = outcome.describe();
        if let Some(body) = outcome.text.filter(|t| !t.is_empty()) {
            log.push_str(": ");
            log.push_str(&body);
        }
        CheckResult {
            status: CheckStatus::Fail,
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xpu_bench_core::{MockDispatcher, RequestError, RequestResult};

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::builder("smoke", "lmsysorg/sglang:latest")
            .port(30000)
            .build()
            .unwrap()
    }

    fn generation() -> Generation {
        Generation {
            model: "qwen".to_string(),
            max_tokens: 8,
            temperature: 0.0,
            timeout: Duration::from_secs(5),
        }
    }

    fn healthy_service(path: &str) -> RequestResult {
        let body = match path {
            "/health" => r#"{"status":"healthy"}"#,
            "/v1/models" => r#"{"object":"list","data":[{"id":"qwen"}]}"#,
            "/v1/chat/completions" => r#"{"choices":[{"message":{"content":"I am online."}}]}"#,
            _ => r#"{"choices":[{"text":" online"}]}"#,
        };
        RequestResult::response(200, body, Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let mut mock = MockDispatcher::new();
        mock.expect_send()
            .times(4)
            .returning(|spec| healthy_service(&spec.path));

        let report = run_smoke_test(&mock, &descriptor(), Engine::Docker, &generation()).await;

        assert!(report.passed());
        assert_eq!(report.results.models.log, "qwen");
        assert_eq!(report.results.chat.log, "I am online.");
        assert_eq!(report.port, 30000);
    }

    #[tokio::test]
    async fn test_one_failed_check_fails_overall() {
        let mut mock = MockDispatcher::new();
        mock.expect_send().times(4).returning(|spec| {
            if spec.path == "/v1/completions" {
                RequestResult::response(404, "not found", Duration::ZERO)
            } else {
                healthy_service(&spec.path)
            }
        });

        let report = run_smoke_test(&mock, &descriptor(), Engine::Podman, &generation()).await;

        assert!(!report.passed());
        assert!(report.results.health.passed());
        assert_eq!(report.results.completion.status, CheckStatus::Fail);
        assert_eq!(report.results.completion.log, "HTTP 404: not found");
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let mut mock = MockDispatcher::new();
        mock.expect_send().times(4).returning(|_| {
            RequestResult::failed(RequestError::network("connection refused"), Duration::ZERO)
        });

        let report = run_smoke_test(&mock, &descriptor(), Engine::Docker, &generation()).await;

        assert_eq!(report.overall_status, CheckStatus::Fail);
        assert!(report.results.health.log.contains("connection refused"));
    }

    #[test]
    fn test_artifact_field_names() {
        let pass = CheckResult {
            status: CheckStatus::Pass,
            log: "ok".to_string(),
        };
        let report = SmokeReport::new(
            Engine::Nerdctl,
            &descriptor(),
            SmokeResults {
                health: pass.clone(),
                models: pass.clone(),
                chat: pass.clone(),
                completion: pass,
            },
        );

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("testDate").is_some());
        assert_eq!(json["containerTool"], "nerdctl");
        assert_eq!(json["image"], "lmsysorg/sglang:latest");
        assert_eq!(json["port"], 30000);
        assert_eq!(json["results"]["chat"]["status"], "pass");
        assert_eq!(json["overallStatus"], "pass");
    }
}
