// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed qualitative scenarios.
//!
//! Each scenario is one named request run once through
//! [`BenchmarkRunner::run_sequential`]; reports come back in scenario order.

use crate::result::BenchmarkReport;
use crate::runner::{BenchmarkRunner, Generation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use xpu_bench_core::{RequestKind, RequestSpec};

/// A named, fixed request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Short conversational opener.
    Greeting,
    /// Technical question answering.
    TechnicalQa,
    /// Code generation.
    CodeGeneration,
    /// Translation between natural languages.
    Translation,
    /// Arithmetic word problem.
    Math,
    /// Plain text continuation against `/v1/completions`.
    Completion,
}

impl Scenario {
    /// All scenarios, in run order.
    pub const ALL: [Scenario; 6] = [
        Scenario::Greeting,
        Scenario::TechnicalQa,
        Scenario::CodeGeneration,
        Scenario::Translation,
        Scenario::Math,
        Scenario::Completion,
    ];

    /// Report name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::TechnicalQa => "technical_qa",
            Self::CodeGeneration => "code_generation",
            Self::Translation => "translation",
            Self::Math => "math",
            Self::Completion => "completion",
        }
    }

    /// Prompt text.
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::Greeting => "Hello! Please introduce yourself in two sentences.",
            Self::TechnicalQa => {
                "What is the difference between tensor parallelism and pipeline parallelism when serving a large language model?"
            }
            Self::CodeGeneration => {
                "Write a Python function that returns the n-th Fibonacci number using iteration."
            }
            Self::Translation => {
                "Translate into French: The benchmark finished and every request returned successfully."
            }
            Self::Math => {
                "A GPU processes 1200 tokens per second. How many tokens does it process in 2.5 minutes? Show your work."
            }
            Self::Completion => "The three most important metrics for an inference server are",
        }
    }

    /// Endpoint this scenario targets.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Completion => RequestKind::Completion,
            _ => RequestKind::Chat,
        }
    }

    /// The scenario's request.
    pub fn request(&self, generation: &Generation) -> RequestSpec {
        generation.request(self.kind(), self.prompt())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run every scenario once, in order, and return one report per scenario.
pub async fn run_scenarios(runner: &BenchmarkRunner, generation: &Generation) -> Vec<BenchmarkReport> {
    let mut reports = Vec::with_capacity(Scenario::ALL.len());
    for scenario in Scenario::ALL {
        let spec = scenario.request(generation);
        let report = runner
            .run_sequential(scenario.name(), move |_| spec.clone(), 1)
            .await;
        info!(
            scenario = scenario.name(),
            success = report.all_succeeded(),
            "Scenario finished"
        );
        reports.push(report);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use xpu_bench_core::{MockDispatcher, RequestResult, ServiceDescriptor};

    fn generation() -> Generation {
        Generation {
            model: "m".to_string(),
            max_tokens: 32,
            temperature: 0.2,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_scenario_names_are_unique() {
        let mut names: Vec<_> = Scenario::ALL.iter().map(Scenario::name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Scenario::ALL.len());
    }

    #[test]
    fn test_completion_scenario_uses_completions_endpoint() {
        let spec = Scenario::Completion.request(&generation());
        assert_eq!(spec.path, "/v1/completions");
        let spec = Scenario::Translation.request(&generation());
        assert_eq!(spec.path, "/v1/chat/completions");
        assert_eq!(spec.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_scenarios_reports_each_in_order() {
        let mut mock = MockDispatcher::new();
        mock.expect_send().times(Scenario::ALL.len()).returning(|spec| {
            if spec.path == "/v1/completions" {
                RequestResult::response(200, r#"{"choices":[{"text":" latency"}]}"#, Duration::ZERO)
            } else {
                RequestResult::response(500, "boom", Duration::ZERO)
            }
        });
        let service = ServiceDescriptor::builder("svc", "img").build().unwrap();
        let runner = BenchmarkRunner::new(Arc::new(mock), service);

        let reports = run_scenarios(&runner, &generation()).await;

        assert_eq!(reports.len(), 6);
        assert_eq!(reports[0].name, "greeting");
        assert_eq!(reports[5].name, "completion");
        assert!(reports[5].all_succeeded());
        assert_eq!(reports[5].sample_output.as_deref(), Some(" latency"));
        // A failing scenario does not stop the rest.
        assert!(reports[..5].iter().all(|r| r.failure_count == 1));
    }
}
