// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI for XPU Bench.
//!
//! Wires configuration into a [`ServiceDescriptor`], drives the service
//! through the lifecycle manager and runs benchmarks against it. Every
//! benchmark command writes its report, even when no request succeeded.

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xpu_bench_adapters::{detect, HttpDispatcher, LifecycleManager, ServiceHandle};
use xpu_bench_benchmarks::{
    detect_source, run_scenarios, run_smoke_test, BenchmarkRunner, Generation, ReportWriter,
};
use xpu_bench_core::{
    BenchConfig, Dispatcher, Engine, LifecycleError, RequestKind, RuntimeBackend, ServiceDescriptor,
};

/// Delay between caller-side retries of `ensure_running`.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// XPU Bench: run inference services in containers and benchmark them.
#[derive(Parser, Debug)]
#[command(name = "xpu-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON).
    #[arg(short, long, global = true, env = "XPU_BENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container engine to use instead of detecting one.
    #[arg(long, global = true)]
    pub engine: Option<Engine>,

    /// Report directory override.
    #[arg(short, long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Bring-up options shared by commands that talk to the service.
#[derive(Args, Debug, Clone, Default)]
pub struct EnsureArgs {
    /// Start the service first if it is not running and healthy.
    #[arg(long)]
    pub ensure: bool,

    /// Retries of engine communication failures during bring-up.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the service (idempotent) and wait until it is healthy.
    Up {
        /// Retries of engine communication failures.
        #[arg(long, default_value_t = 2)]
        retries: u32,
    },

    /// Stop and remove the service container.
    Down,

    /// Show the service container's state.
    Status,

    /// Print the service container's logs.
    Logs {
        /// Number of lines from the end.
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },

    /// Run a throughput/latency benchmark.
    Bench {
        /// Number of requests.
        #[arg(short = 'n', long)]
        requests: Option<usize>,

        /// Concurrent workers; 1 runs sequentially.
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Stop dispatching new requests after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Generation endpoint: chat or completion.
        #[arg(long)]
        kind: Option<RequestKind>,

        /// Bring-up options.
        #[command(flatten)]
        service: EnsureArgs,
    },

    /// Run each fixed scenario once.
    Scenarios {
        /// Bring-up options.
        #[command(flatten)]
        service: EnsureArgs,
    },

    /// Check health, models, chat and completion once each.
    Smoke {
        /// Bring-up options.
        #[command(flatten)]
        service: EnsureArgs,
    },
}

/// Install the global tracing subscriber. Logs go to stderr.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Run the CLI with the process arguments.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the service cannot be
/// brought up or torn down, or reports cannot be written.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(execute(cli))
}

/// Execute a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let mut config = BenchConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(engine) = cli.engine {
        config.runtime.engines = vec![engine];
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = Some(dir);
    }

    match cli.command {
        Commands::Up { retries } => {
            let ctx = Session::new(config)?;
            let manager = ctx.manager().await?;
            let handle = ensure_with_retries(&manager, &ctx.descriptor, retries).await?;
            output::print_handle(&handle);
            Ok(())
        }
        Commands::Down => {
            let ctx = Session::new(config)?;
            let manager = ctx.manager().await?;
            let outcome = manager.teardown(&ctx.descriptor).await?;
            output::print_teardown(ctx.descriptor.name(), outcome);
            Ok(())
        }
        Commands::Status => {
            let ctx = Session::new(config)?;
            let manager = ctx.manager().await?;
            let status = manager.status(&ctx.descriptor).await?;
            output::print_status(ctx.descriptor.name(), &status);
            Ok(())
        }
        Commands::Logs { tail } => {
            let ctx = Session::new(config)?;
            let backend = detect(&ctx.config.runtime.engines).await?;
            let lines = backend
                .logs(ctx.descriptor.name(), tail)
                .await
                .with_context(|| format!("Failed to read logs of '{}'", ctx.descriptor.name()))?;
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Bench {
            requests,
            concurrency,
            deadline_secs,
            kind,
            service,
        } => {
            if let Some(n) = requests {
                config.benchmark.requests = n;
            }
            if let Some(j) = concurrency {
                config.benchmark.concurrency = j;
            }
            if deadline_secs.is_some() {
                config.benchmark.deadline_secs = deadline_secs;
            }
            if let Some(kind) = kind {
                config.benchmark.kind = kind;
            }
            let ctx = Session::new(config)?;
            ctx.ensure_if_requested(&service).await?;
            bench(&ctx).await
        }
        Commands::Scenarios { service } => {
            let ctx = Session::new(config)?;
            ctx.ensure_if_requested(&service).await?;
            scenarios(&ctx).await
        }
        Commands::Smoke { service } => {
            let ctx = Session::new(config)?;
            let engines = &ctx.config.runtime.engines;
            let engine = match ctx.ensure_if_requested(&service).await? {
                Some(manager) => manager.engine(),
                None => engine_or_fallback(detect(engines).await, engines),
            };
            smoke(&ctx, engine).await
        }
    }
}

/// Engine to record in a report; the first configured engine when none
/// responded.
fn engine_or_fallback(
    detected: Result<Arc<dyn RuntimeBackend>, LifecycleError>,
    configured: &[Engine],
) -> Engine {
    match detected {
        Ok(backend) => backend.engine(),
        Err(e) => {
            let fallback = configured.first().copied().unwrap_or(Engine::Docker);
            warn!(error = %e, engine = %fallback, "No container engine responded, recording the first configured one");
            fallback
        }
    }
}

/// Call `ensure_running`, retrying engine communication failures.
///
/// Health check timeouts are never retried.
pub async fn ensure_with_retries(
    manager: &LifecycleManager,
    descriptor: &ServiceDescriptor,
    retries: u32,
) -> Result<ServiceHandle, LifecycleError> {
    ensure_with_retries_after(manager, descriptor, retries, RETRY_DELAY).await
}

async fn ensure_with_retries_after(
    manager: &LifecycleManager,
    descriptor: &ServiceDescriptor,
    retries: u32,
    delay: Duration,
) -> Result<ServiceHandle, LifecycleError> {
    let mut attempt = 0;
    loop {
        match manager.ensure_running(descriptor).await {
            Ok(handle) => return Ok(handle),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(container = %descriptor.name(), attempt, retries, error = %e, "Bring-up failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolved configuration for one invocation.
struct Session {
    config: BenchConfig,
    descriptor: ServiceDescriptor,
}

impl Session {
    fn new(config: BenchConfig) -> Result<Self> {
        let descriptor = config.descriptor().context("Invalid service configuration")?;
        Ok(Self { config, descriptor })
    }

    fn service_url(&self) -> String {
        self.descriptor.service_url(&self.config.service.host)
    }

    fn dispatcher(&self) -> Result<HttpDispatcher> {
        HttpDispatcher::new(self.service_url()).context("Failed to build HTTP client")
    }

    async fn manager(&self) -> Result<LifecycleManager> {
        let backend = detect(&self.config.runtime.engines).await?;
        Ok(LifecycleManager::new(backend, Arc::new(self.dispatcher()?))
            .with_policy(self.config.health.policy())
            .with_host(&self.config.service.host))
    }

    async fn ensure_if_requested(&self, args: &EnsureArgs) -> Result<Option<LifecycleManager>> {
        if !args.ensure {
            return Ok(None);
        }
        let manager = self.manager().await?;
        let handle = ensure_with_retries(&manager, &self.descriptor, args.retries).await?;
        output::print_handle(&handle);
        Ok(Some(manager))
    }

    fn generation(&self) -> Generation {
        let benchmark = &self.config.benchmark;
        Generation {
            model: benchmark.model.clone(),
            max_tokens: benchmark.max_tokens,
            temperature: benchmark.temperature,
            timeout: benchmark.timeout(),
        }
    }

    async fn runner(&self) -> Result<BenchmarkRunner> {
        let benchmark = &self.config.benchmark;
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(self.dispatcher()?);
        let mut runner = BenchmarkRunner::new(dispatcher, self.descriptor.clone())
            .with_deadline(benchmark.deadline());
        if benchmark.telemetry {
            if let Some(source) = detect_source().await {
                runner = runner.with_telemetry(source, benchmark.telemetry_interval());
            }
        }
        Ok(runner)
    }

    fn writer(&self) -> ReportWriter {
        ReportWriter::new(self.config.output_dir())
    }
}

async fn bench(ctx: &Session) -> Result<()> {
    let benchmark = &ctx.config.benchmark;
    let count = benchmark.requests;
    let concurrency = benchmark.concurrency.max(1);
    let name = benchmark.kind.to_string();

    info!(
        url = %ctx.service_url(),
        requests = count,
        concurrency,
        kind = %benchmark.kind,
        "Running benchmark"
    );

    let pb = output::progress_bar(count);
    let runner = ctx.runner().await?.with_progress(output::progress_hook(&pb));
    let build = ctx.generation().indexed_requests(benchmark.kind);

    let report = if concurrency == 1 {
        runner.run_sequential(&name, build, count).await
    } else {
        runner.run_concurrent(&name, build, count, concurrency).await
    };
    pb.finish_and_clear();

    let paths = ctx
        .writer()
        .write_benchmarks(std::slice::from_ref(&report))
        .context("Failed to write benchmark report")?;

    output::print_report(&report);
    for path in paths {
        println!("Report: {}", path.display());
    }
    Ok(())
}

async fn scenarios(ctx: &Session) -> Result<()> {
    let runner = ctx.runner().await?;
    let reports = run_scenarios(&runner, &ctx.generation()).await;

    ctx.writer()
        .write_benchmarks(&reports)
        .context("Failed to write scenario reports")?;

    for report in &reports {
        output::print_report(report);
        if let Some(sample) = &report.sample_output {
            println!("  Output:       {}", sample.lines().next().unwrap_or_default());
        }
    }
    println!("Reports written to {}", ctx.config.output_dir().display());
    Ok(())
}

async fn smoke(ctx: &Session, engine: Engine) -> Result<()> {
    let dispatcher = ctx.dispatcher()?;
    let report = run_smoke_test(&dispatcher, &ctx.descriptor, engine, &ctx.generation()).await;

    let path = ctx
        .writer()
        .write_smoke(&report)
        .context("Failed to write smoke report")?;

    output::print_smoke(&report);
    println!("Report: {}", path.display());

    if !report.passed() {
        anyhow::bail!("Smoke test failed for {}", ctx.service_url());
    }
    Ok(())
}
