// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Benchmark runner.
//!
//! Drives a batch of requests through a [`Dispatcher`], either one after
//! another or from a bounded pool of workers sharing a work queue, and
//! folds every outcome (failures included) into a [`BenchmarkReport`].
//!
//! Per-request failures never abort a run. When a deadline is set, requests
//! already in flight finish normally but no new request is dispatched once
//! it has passed; the remainder is reported as `skipped`. With a
//! [`TelemetrySource`] attached, accelerators are sampled for the length of
//! each run and the summary lands in the report.

use crate::result::{BenchmarkReport, RequestOutcome};
use crate::telemetry::{TelemetrySampler, TelemetrySource, TelemetrySummary, DEFAULT_SAMPLE_INTERVAL};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xpu_bench_core::{Dispatcher, RequestKind, RequestSpec, ServiceDescriptor};

/// Callback invoked after every completed request.
pub type ProgressHook = Arc<dyn Fn(&RequestOutcome) + Send + Sync>;

/// Generation parameters shared by benchmark, scenario and smoke runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Served model name.
    pub model: String,
    /// Generation limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Generation {
    /// Request builder that embeds the request index in the prompt so
    /// consecutive requests never hit a prefix cache with identical text.
    pub fn indexed_requests(&self, kind: RequestKind) -> impl Fn(usize) -> RequestSpec + Send + Sync + 'static {
        let generation = self.clone();
        move |index| {
            let prompt = format!(
                "Request #{}: explain in a few sentences how large language model inference is accelerated on GPUs.",
                index
            );
            generation.request(kind, &prompt)
        }
    }

    /// A single generation request for `prompt`.
    pub fn request(&self, kind: RequestKind, prompt: &str) -> RequestSpec {
        kind.request(&self.model, prompt, self.max_tokens, self.temperature)
            .with_timeout(self.timeout)
    }
}

/// Runs batches of requests against one service.
pub struct BenchmarkRunner {
    dispatcher: Arc<dyn Dispatcher>,
    service: ServiceDescriptor,
    deadline: Option<Duration>,
    progress: Option<ProgressHook>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    telemetry_interval: Duration,
}

impl BenchmarkRunner {
    /// Create a runner for `service` dispatching through `dispatcher`.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, service: ServiceDescriptor) -> Self {
        Self {
            dispatcher,
            service,
            deadline: None,
            progress: None,
            telemetry: None,
            telemetry_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    /// Stop dispatching new requests once `deadline` has elapsed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Invoke `hook` after every completed request.
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Sample `source` every `interval` while a run is in progress.
    pub fn with_telemetry(mut self, source: Arc<dyn TelemetrySource>, interval: Duration) -> Self {
        self.telemetry = Some(source);
        self.telemetry_interval = interval;
        self
    }

    /// Service this runner targets.
    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Dispatcher this runner sends through.
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// Dispatch `count` requests one after another.
    ///
    /// `build` receives the 1-based request index.
    pub async fn run_sequential<F>(&self, name: &str, build: F, count: usize) -> BenchmarkReport
    where
        F: Fn(usize) -> RequestSpec,
    {
        info!(run = name, count, "Starting sequential benchmark");

        let sampler = self.start_telemetry();
        let started = Instant::now();
        let deadline = self.deadline.map(|d| started + d);
        let mut outcomes = Vec::with_capacity(count);

        for index in 1..=count {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(run = name, dispatched = index - 1, "Deadline reached, not dispatching remaining requests");
                break;
            }
            let spec = build(index);
            let outcome = dispatch(self.dispatcher.as_ref(), index, &spec, self.progress.as_ref()).await;
            outcomes.push(outcome);
        }

        let wall_time = started.elapsed();
        let telemetry = finish_telemetry(sampler).await;
        self.finish(name, 1, outcomes, count, wall_time, telemetry)
    }

    /// Dispatch `count` requests from `concurrency` workers.
    ///
    /// Workers claim indices from a shared queue and send outcomes to a
    /// single collector. Wall time runs from the first dispatch to the last
    /// completion across all workers.
    pub async fn run_concurrent<F>(
        &self,
        name: &str,
        build: F,
        count: usize,
        concurrency: usize,
    ) -> BenchmarkReport
    where
        F: Fn(usize) -> RequestSpec + Send + Sync + 'static,
    {
        let workers = concurrency.clamp(1, count.max(1));
        info!(run = name, count, workers, "Starting concurrent benchmark");

        let build = Arc::new(build);
        let next = Arc::new(AtomicUsize::new(1));
        let (tx, mut rx) = mpsc::unbounded_channel::<RequestOutcome>();

        let sampler = self.start_telemetry();
        let started = Instant::now();
        let deadline = self.deadline.map(|d| started + d);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let build = Arc::clone(&build);
                let next = Arc::clone(&next);
                let dispatcher = Arc::clone(&self.dispatcher);
                let progress = self.progress.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    loop {
                        if deadline.is_some_and(|d| Instant::now() >= d) {
                            debug!(worker, "Deadline reached, worker stopping");
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        if index > count {
                            break;
                        }
                        let spec = build(index);
                        let outcome = dispatch(dispatcher.as_ref(), index, &spec, progress.as_ref()).await;
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut outcomes = Vec::with_capacity(count);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        let wall_time = started.elapsed();

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(run = name, error = %e, "Benchmark worker failed");
            }
        }

        let telemetry = finish_telemetry(sampler).await;
        self.finish(name, workers, outcomes, count, wall_time, telemetry)
    }

    fn start_telemetry(&self) -> Option<TelemetrySampler> {
        self.telemetry
            .as_ref()
            .map(|source| TelemetrySampler::start(Arc::clone(source), self.telemetry_interval))
    }

    fn finish(
        &self,
        name: &str,
        concurrency: usize,
        outcomes: Vec<RequestOutcome>,
        planned: usize,
        wall_time: Duration,
        telemetry: Option<TelemetrySummary>,
    ) -> BenchmarkReport {
        let skipped = planned.saturating_sub(outcomes.len());
        let report = BenchmarkReport::from_outcomes(
            name,
            &self.service,
            concurrency,
            &outcomes,
            skipped,
            wall_time,
        )
        .with_telemetry(telemetry);

        info!(
            run = name,
            total = report.total_requests,
            success = report.success_count,
            failed = report.failure_count,
            skipped = report.skipped,
            wall_time_secs = report.total_wall_time.as_secs_f64(),
            throughput = report.throughput_per_second,
            "Benchmark completed"
        );

        report
    }
}

async fn finish_telemetry(sampler: Option<TelemetrySampler>) -> Option<TelemetrySummary> {
    match sampler {
        Some(sampler) => Some(sampler.finish().await),
        None => None,
    }
}

/// Dispatch one request, timing the call and classifying the result.
pub(crate) async fn dispatch(
    dispatcher: &dyn Dispatcher,
    index: usize,
    spec: &RequestSpec,
    progress: Option<&ProgressHook>,
) -> RequestOutcome {
    let started = Instant::now();
    let mut result = dispatcher.send(spec).await;
    result.latency = started.elapsed();

    let outcome = RequestOutcome::classify(index, result, spec.shape);

    metrics::counter!("xpu_bench_requests_total", "outcome" => outcome.label()).increment(1);
    metrics::histogram!("xpu_bench_request_latency_seconds").record(outcome.latency.as_secs_f64());

    if !outcome.is_success() {
        debug!(
            index,
            path = %spec.path,
            outcome = outcome.label(),
            detail = %outcome.describe(),
            "Request failed"
        );
    }

    if let Some(hook) = progress {
        hook(&outcome);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use xpu_bench_core::{MockDispatcher, RequestError, RequestResult};
    use crate::telemetry::{DeviceSample, HardwareKind, TelemetryError};

    const CHAT_OK: &str = r#"{"choices":[{"message":{"content":"ok"}}]}"#;

    fn service() -> ServiceDescriptor {
        ServiceDescriptor::builder("bench-svc", "vllm/vllm-openai:latest")
            .build()
            .unwrap()
    }

    fn generation() -> Generation {
        Generation {
            model: "test-model".to_string(),
            max_tokens: 16,
            temperature: 0.0,
            timeout: Duration::from_secs(5),
        }
    }

    /// Dispatcher that answers every request after a fixed delay and
    /// records the prompts it saw.
    struct SlowDispatcher {
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        paths: Mutex<Vec<String>>,
    }

    impl SlowDispatcher {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                paths: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Dispatcher for SlowDispatcher {
        async fn send(&self, spec: &RequestSpec) -> RequestResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.paths.lock().unwrap().push(spec.path.clone());
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            RequestResult::response(200, CHAT_OK, self.delay)
        }
    }

    #[tokio::test]
    async fn test_sequential_counts_for_various_sizes() {
        for count in [0usize, 1, 7] {
            let mut mock = MockDispatcher::new();
            mock.expect_send()
                .times(count)
                .returning(|_| RequestResult::response(200, CHAT_OK, Duration::ZERO));
            let runner = BenchmarkRunner::new(Arc::new(mock), service());

            let report = runner
                .run_sequential("chat", generation().indexed_requests(RequestKind::Chat), count)
                .await;

            assert_eq!(report.total_requests, count);
            assert_eq!(report.success_count + report.failure_count, count);
            assert_eq!(report.success_count, count);
            assert_eq!(report.skipped, 0);
        }
    }

    #[tokio::test]
    async fn test_sequential_embeds_index_in_prompt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_mock = Arc::clone(&seen);
        let mut mock = MockDispatcher::new();
        mock.expect_send().times(3).returning(move |spec| {
            let body = spec.body.clone().unwrap_or_default();
            let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
            seen_in_mock.lock().unwrap().push(prompt);
            RequestResult::response(200, CHAT_OK, Duration::ZERO)
        });
        let runner = BenchmarkRunner::new(Arc::new(mock), service());

        runner
            .run_sequential("chat", generation().indexed_requests(RequestKind::Chat), 3)
            .await;

        let prompts = seen.lock().unwrap();
        assert!(prompts[0].starts_with("Request #1:"));
        assert!(prompts[2].starts_with("Request #3:"));
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_the_run() {
        let mut calls = 0;
        let mut mock = MockDispatcher::new();
        mock.expect_send().times(6).returning(move |_| {
            calls += 1;
            match calls % 3 {
                0 => RequestResult::response(500, "overloaded", Duration::ZERO),
                1 => RequestResult::failed(RequestError::network("connection refused"), Duration::ZERO),
                _ => RequestResult::response(200, CHAT_OK, Duration::ZERO),
            }
        });
        let runner = BenchmarkRunner::new(Arc::new(mock), service());

        let report = runner
            .run_sequential("chat", generation().indexed_requests(RequestKind::Chat), 6)
            .await;

        assert_eq!(report.total_requests, 6);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 4);
        assert_eq!(report.failures.http, 2);
        assert_eq!(report.failures.network, 2);
    }

    #[tokio::test]
    async fn test_all_failures_still_produce_report() {
        let mut mock = MockDispatcher::new();
        mock.expect_send().times(4).returning(|_| {
            RequestResult::failed(RequestError::network("connection refused"), Duration::ZERO)
        });
        let runner = BenchmarkRunner::new(Arc::new(mock), service());

        let report = runner
            .run_concurrent("chat", generation().indexed_requests(RequestKind::Chat), 4, 2)
            .await;

        assert_eq!(report.total_requests, 4);
        assert_eq!(report.success_count, 0);
        assert_eq!(report.success_rate(), 0.0);
        assert_eq!(report.throughput_per_second, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_dispatches_exactly_count() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(10)));
        let runner = BenchmarkRunner::new(dispatcher.clone(), service());

        let report = runner
            .run_concurrent("chat", generation().indexed_requests(RequestKind::Chat), 20, 4)
            .await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 20);
        assert_eq!(report.total_requests, 20);
        assert_eq!(report.per_request_latencies.len(), 20);
        assert_eq!(report.concurrency, 4);
        assert!(dispatcher.max_in_flight.load(Ordering::SeqCst) <= 4);
        assert!(dispatcher.max_in_flight.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_concurrent_wall_time_is_not_sum_of_latencies() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(50)));
        let runner = BenchmarkRunner::new(dispatcher, service());

        let report = runner
            .run_concurrent("chat", generation().indexed_requests(RequestKind::Chat), 8, 8)
            .await;

        let summed: Duration = report.per_request_latencies.iter().sum();
        assert!(report.total_wall_time < summed);
        assert!(report.throughput_per_second > 0.0);
    }

    #[tokio::test]
    async fn test_concurrency_is_capped_by_count() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(1)));
        let runner = BenchmarkRunner::new(dispatcher.clone(), service());

        let report = runner
            .run_concurrent("chat", generation().indexed_requests(RequestKind::Chat), 2, 16)
            .await;

        assert_eq!(report.concurrency, 2);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadline_stops_new_dispatches() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(40)));
        let runner = BenchmarkRunner::new(dispatcher.clone(), service())
            .with_deadline(Some(Duration::from_millis(100)));

        let report = runner
            .run_sequential("chat", generation().indexed_requests(RequestKind::Chat), 50)
            .await;

        let calls = dispatcher.calls.load(Ordering::SeqCst);
        assert!(calls < 50);
        assert_eq!(report.total_requests, calls);
        assert_eq!(report.skipped, 50 - calls);
        // In-flight requests were allowed to finish.
        assert_eq!(report.success_count, calls);
    }

    #[tokio::test]
    async fn test_progress_hook_sees_every_request() {
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completed);
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(1)));
        let runner = BenchmarkRunner::new(dispatcher, service()).with_progress(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        runner
            .run_concurrent("chat", generation().indexed_requests(RequestKind::Completion), 9, 3)
            .await;

        assert_eq!(completed.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_completion_kind_targets_completions_endpoint() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::ZERO));
        let runner = BenchmarkRunner::new(dispatcher.clone(), service());

        runner
            .run_sequential("completion", generation().indexed_requests(RequestKind::Completion), 2)
            .await;

        let paths = dispatcher.paths.lock().unwrap();
        assert!(paths.iter().all(|p| p == "/v1/completions"));
    }

    struct OneGpu;

    #[async_trait]
    impl TelemetrySource for OneGpu {
        fn hardware(&self) -> HardwareKind {
            HardwareKind::Nvidia
        }

        async fn sample(&self) -> Result<Vec<DeviceSample>, TelemetryError> {
            Ok(vec![DeviceSample {
                index: 0,
                name: "NVIDIA L4".to_string(),
                utilization_pct: Some(75.0),
                memory_used_mib: Some(12000.0),
                memory_total_mib: Some(23034.0),
                temperature_c: Some(60.0),
                power_w: Some(70.0),
            }])
        }
    }

    #[tokio::test]
    async fn test_telemetry_is_attached_to_report() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::from_millis(2)));
        let runner = BenchmarkRunner::new(dispatcher, service())
            .with_telemetry(Arc::new(OneGpu), Duration::from_millis(1));

        let report = runner
            .run_concurrent("chat", generation().indexed_requests(RequestKind::Chat), 8, 2)
            .await;

        let telemetry = report.telemetry.expect("telemetry summary");
        assert_eq!(telemetry.hardware, HardwareKind::Nvidia);
        assert!(telemetry.samples >= 1);
        assert_eq!(telemetry.devices[0].avg_utilization_pct, Some(75.0));
    }

    #[tokio::test]
    async fn test_no_telemetry_without_source() {
        let dispatcher = Arc::new(SlowDispatcher::new(Duration::ZERO));
        let report = BenchmarkRunner::new(dispatcher, service())
            .run_sequential("chat", generation().indexed_requests(RequestKind::Chat), 1)
            .await;

        assert!(report.telemetry.is_none());
    }
}
