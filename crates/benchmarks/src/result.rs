// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Benchmark result types.
//!
//! A [`RequestOutcome`] records one dispatched request after response-shape
//! validation; a [`BenchmarkReport`] aggregates the outcomes of one run.
//! Reports are built once, at the end of a run, and never mutated.

use crate::latency::{per_second, LatencyDistribution};
use crate::telemetry::TelemetrySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use xpu_bench_core::{RequestError, RequestResult, ResponseShape, ServiceDescriptor};

/// One dispatched request, classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// 1-based position in the run.
    pub index: usize,
    /// HTTP status, 0 when no response arrived.
    pub status_code: u16,
    /// Wall-clock time around the dispatch call.
    pub latency: Duration,
    /// Failure classification, if any.
    pub error: Option<RequestError>,
    /// Extracted response text.
    pub text: Option<String>,
    /// Completion tokens reported by the server.
    pub completion_tokens: Option<u64>,
}

impl RequestOutcome {
    /// Classify a dispatch result, validating a 200 body against `shape`.
    ///
    /// A 200 whose body does not match `shape` becomes a protocol error.
    pub fn classify(index: usize, result: RequestResult, shape: ResponseShape) -> Self {
        let mut outcome = Self {
            index,
            status_code: result.status_code,
            latency: result.latency,
            error: result.error.clone(),
            text: None,
            completion_tokens: None,
        };

        if result.is_success() {
            match shape.parse(&result.body) {
                Ok(parsed) => {
                    outcome.text = parsed.text;
                    outcome.completion_tokens = parsed.completion_tokens;
                }
                Err(err) => outcome.error = Some(err),
            }
        } else if result.error.is_none() {
            outcome.text = Some(result.body_text());
        }

        outcome
    }

    /// `200` with a well-formed body.
    pub fn is_success(&self) -> bool {
        self.status_code == 200 && self.error.is_none()
    }

    /// Short outcome label, used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match &self.error {
            None if self.status_code == 200 => "success",
            None => "http_error",
            Some(RequestError::Network { timed_out: true, .. }) => "timeout",
            Some(RequestError::Network { .. }) => "network_error",
            Some(RequestError::Protocol { .. }) => "protocol_error",
        }
    }

    /// One-line description for logs and reports.
    pub fn describe(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(err), 0) => err.to_string(),
            (Some(err), status) => format!("HTTP {}: {}", status, err),
            (None, status) => format!("HTTP {}", status),
        }
    }
}

/// Failure counts by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBreakdown {
    /// Responses with a non-200 status.
    pub http: usize,
    /// Connection or DNS failures.
    pub network: usize,
    /// Requests that exceeded their timeout.
    pub timeout: usize,
    /// 200 responses with an unexpected body.
    pub protocol: usize,
}

impl FailureBreakdown {
    fn record(&mut self, outcome: &RequestOutcome) {
        match outcome.label() {
            "http_error" => self.http += 1,
            "network_error" => self.network += 1,
            "timeout" => self.timeout += 1,
            "protocol_error" => self.protocol += 1,
            _ => {}
        }
    }

    /// Sum of all failure causes.
    pub fn total(&self) -> usize {
        self.http + self.network + self.timeout + self.protocol
    }
}

/// Aggregated result of one benchmark run.
///
/// `success_count + failure_count == total_requests` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Run name (benchmark kind or scenario name).
    pub name: String,
    /// Worker count; 1 for sequential runs.
    pub concurrency: usize,
    /// Requests dispatched.
    pub total_requests: usize,
    /// Requests that returned 200 with a well-formed body.
    pub success_count: usize,
    /// All other dispatched requests.
    pub failure_count: usize,
    /// Failure causes.
    pub failures: FailureBreakdown,
    /// Requests never dispatched because the deadline passed.
    pub skipped: usize,
    /// First dispatch to last completion.
    pub total_wall_time: Duration,
    /// Per-request latency, in collection order.
    pub per_request_latencies: Vec<Duration>,
    /// `success_count / total_wall_time`.
    pub throughput_per_second: f64,
    /// Latency statistics over all dispatched requests.
    pub latency: LatencyDistribution,
    /// Completion tokens reported across successful requests.
    pub completion_tokens: u64,
    /// `completion_tokens / total_wall_time`.
    pub tokens_per_second: f64,
    /// First successful response text, for qualitative review.
    pub sample_output: Option<String>,
    /// When the report was built.
    pub timestamp: DateTime<Utc>,
    /// Service the run targeted.
    pub service: ServiceDescriptor,
    /// Accelerator telemetry sampled during the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySummary>,
}

impl BenchmarkReport {
    /// Aggregate `outcomes` into a report.
    pub fn from_outcomes(
        name: impl Into<String>,
        service: &ServiceDescriptor,
        concurrency: usize,
        outcomes: &[RequestOutcome],
        skipped: usize,
        total_wall_time: Duration,
    ) -> Self {
        let mut failures = FailureBreakdown::default();
        let mut success_count = 0;
        let mut completion_tokens = 0;
        let mut sample_output = None;

        for outcome in outcomes {
            if outcome.is_success() {
                success_count += 1;
                completion_tokens += outcome.completion_tokens.unwrap_or(0);
                if sample_output.is_none() {
                    sample_output = outcome.text.clone();
                }
            } else {
                failures.record(outcome);
            }
        }

        let per_request_latencies: Vec<Duration> = outcomes.iter().map(|o| o.latency).collect();

        Self {
            run_id: Uuid::new_v4(),
            name: name.into(),
            concurrency,
            total_requests: outcomes.len(),
            success_count,
            failure_count: outcomes.len() - success_count,
            failures,
            skipped,
            total_wall_time,
            latency: LatencyDistribution::from_samples(&per_request_latencies),
            per_request_latencies,
            throughput_per_second: throughput(success_count, total_wall_time),
            completion_tokens,
            tokens_per_second: per_second(completion_tokens, total_wall_time),
            sample_output,
            timestamp: Utc::now(),
            service: service.clone(),
            telemetry: None,
        }
    }

    /// Attach accelerator telemetry.
    pub fn with_telemetry(mut self, telemetry: Option<TelemetrySummary>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Fraction of dispatched requests that succeeded, 0.0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_requests as f64
    }

    /// Whether every dispatched request succeeded and nothing was skipped.
    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.skipped == 0
    }
}

/// Successful requests per second of wall time.
pub fn throughput(success_count: usize, total_wall_time: Duration) -> f64 {
    per_second(success_count as u64, total_wall_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpu_bench_core::RequestResult;

    fn service() -> ServiceDescriptor {
        ServiceDescriptor::builder("svc", "image:tag").build().unwrap()
    }

    fn ok_outcome(index: usize) -> RequestOutcome {
        let body = r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"completion_tokens":4}}"#;
        RequestOutcome::classify(
            index,
            RequestResult::response(200, body, Duration::from_millis(100)),
            ResponseShape::ChatCompletion,
        )
    }

    #[test]
    fn test_throughput_calculation() {
        assert_eq!(throughput(5, Duration::from_secs(10)), 0.5);
        assert_eq!(throughput(0, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_report_throughput_uses_wall_time() {
        let outcomes: Vec<_> = (1..=5).map(ok_outcome).collect();
        let report =
            BenchmarkReport::from_outcomes("chat", &service(), 1, &outcomes, 0, Duration::from_secs(10));
        assert_eq!(report.success_count, 5);
        assert_eq!(report.throughput_per_second, 0.5);
        assert_eq!(report.completion_tokens, 20);
        assert_eq!(report.tokens_per_second, 2.0);
        assert_eq!(report.sample_output.as_deref(), Some("hi"));
    }

    #[test]
    fn test_http_500_is_failure_not_network_error() {
        let outcome = RequestOutcome::classify(
            1,
            RequestResult::response(500, "internal error", Duration::from_millis(3)),
            ResponseShape::ChatCompletion,
        );
        assert!(!outcome.is_success());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.label(), "http_error");

        let report = BenchmarkReport::from_outcomes("chat", &service(), 1, &[outcome], 0, Duration::from_secs(1));
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.failures.http, 1);
        assert_eq!(report.failures.network, 0);
    }

    #[test]
    fn test_connection_refused_is_network_failure() {
        let outcome = RequestOutcome::classify(
            1,
            RequestResult::failed(RequestError::network("connection refused"), Duration::from_millis(1)),
            ResponseShape::ChatCompletion,
        );
        assert_eq!(outcome.label(), "network_error");

        let report = BenchmarkReport::from_outcomes("chat", &service(), 1, &[outcome], 0, Duration::from_secs(1));
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.failures.network, 1);
    }

    #[test]
    fn test_malformed_200_is_protocol_failure() {
        let outcome = RequestOutcome::classify(
            1,
            RequestResult::response(200, "not json", Duration::from_millis(1)),
            ResponseShape::Completion,
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.label(), "protocol_error");
    }

    #[test]
    fn test_counts_always_add_up() {
        let mut outcomes: Vec<_> = (1..=3).map(ok_outcome).collect();
        outcomes.push(RequestOutcome::classify(
            4,
            RequestResult::failed(RequestError::timeout("timed out"), Duration::from_secs(60)),
            ResponseShape::ChatCompletion,
        ));
        let report =
            BenchmarkReport::from_outcomes("chat", &service(), 2, &outcomes, 0, Duration::from_secs(61));
        assert_eq!(report.total_requests, 4);
        assert_eq!(report.success_count + report.failure_count, report.total_requests);
        assert_eq!(report.failures.total(), report.failure_count);
        assert_eq!(report.failures.timeout, 1);
        assert_eq!(report.per_request_latencies.len(), 4);
    }

    #[test]
    fn test_empty_report() {
        let report = BenchmarkReport::from_outcomes("chat", &service(), 1, &[], 0, Duration::ZERO);
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.success_rate(), 0.0);
        assert_eq!(report.throughput_per_second, 0.0);
        assert!(report.all_succeeded());
    }
}
