// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Terminal rendering.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use xpu_bench_adapters::{ServiceHandle, ServiceStatus, TeardownOutcome};
use xpu_bench_benchmarks::telemetry::DeviceSummary;
use xpu_bench_benchmarks::{BenchmarkReport, ProgressHook, RequestOutcome, SmokeReport};
use xpu_bench_core::{ContainerState, LifecycleError};

/// Progress bar over `total` requests.
pub fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Runner hook that advances `pb` and surfaces the latest failure.
pub fn progress_hook(pb: &ProgressBar) -> ProgressHook {
    let pb = pb.clone();
    Arc::new(move |outcome: &RequestOutcome| {
        pb.inc(1);
        if !outcome.is_success() {
            pb.set_message(format!("last failure: {}", outcome.describe()));
        }
    })
}

/// Print a healthy service.
pub fn print_handle(handle: &ServiceHandle) {
    let how = if handle.reused { "reused" } else { "started" };
    println!(
        "{} {} ({}, {} health check{})",
        "✓".green(),
        handle.container.bold(),
        how,
        handle.health_checks,
        if handle.health_checks == 1 { "" } else { "s" }
    );
    if let Some(id) = &handle.container_id {
        println!("  Container: {}", short_id(id));
    }
    println!("  URL:       {}", handle.service_url);
}

/// Print a teardown result.
pub fn print_teardown(name: &str, outcome: TeardownOutcome) {
    match outcome {
        TeardownOutcome::Removed => println!("{} {} stopped and removed", "✓".green(), name.bold()),
        TeardownOutcome::AlreadyAbsent => {
            println!("{} {} was not present, nothing to do", "•".blue(), name.bold())
        }
    }
}

/// Print a container status.
pub fn print_status(name: &str, status: &ServiceStatus) {
    let state = match status.state {
        ContainerState::Running => "running".green(),
        ContainerState::Stopped => "stopped".yellow(),
        ContainerState::Absent => "absent".dimmed(),
    };
    println!("{}: {}", name.bold(), state);
    if let Some(id) = &status.container_id {
        println!("  Container: {}", short_id(id));
    }
    if let Some(url) = &status.service_url {
        println!("  URL:       {}", url);
    }
    if status.stale {
        println!(
            "  {} created from a different configuration; `up` will recreate it",
            "!".yellow()
        );
    }
}

/// Print one benchmark report.
pub fn print_report(report: &BenchmarkReport) {
    let marker = if report.all_succeeded() {
        "✓".green()
    } else if report.success_count == 0 {
        "✗".red()
    } else {
        "!".yellow()
    };

    println!("{} {}", marker, report.name.bold());
    println!(
        "  Requests:     {} total, {} ok, {} failed, {} skipped",
        report.total_requests, report.success_count, report.failure_count, report.skipped
    );
    println!("  Success rate: {:.1}%", report.success_rate() * 100.0);
    println!("  Concurrency:  {}", report.concurrency);
    println!("  Wall time:    {:.2}s", report.total_wall_time.as_secs_f64());
    println!("  Throughput:   {:.2} req/s", report.throughput_per_second);
    if report.completion_tokens > 0 {
        println!(
            "  Tokens:       {} ({:.1} tok/s)",
            report.completion_tokens, report.tokens_per_second
        );
    }
    println!(
        "  Latency:      p50 {} ms, p95 {} ms, p99 {} ms",
        report.latency.p50.as_millis(),
        report.latency.p95.as_millis(),
        report.latency.p99.as_millis()
    );
    if report.failure_count > 0 {
        let f = &report.failures;
        println!(
            "  Failures:     http {}, network {}, timeout {}, protocol {}",
            f.http, f.network, f.timeout, f.protocol
        );
    }
    if let Some(telemetry) = &report.telemetry {
        println!(
            "  Telemetry:    {} ({} samples)",
            telemetry.hardware, telemetry.samples
        );
        for device in &telemetry.devices {
            println!("    #{} {}: {}", device.index, device.name, device_line(device));
        }
    }
}

fn device_line(device: &DeviceSummary) -> String {
    let mut parts = Vec::new();
    if let Some(util) = device.avg_utilization_pct {
        parts.push(format!("util {:.0}%", util));
    }
    if let Some(used) = device.peak_memory_used_mib {
        match device.memory_total_mib {
            Some(total) => parts.push(format!("mem {:.0}/{:.0} MiB", used, total)),
            None => parts.push(format!("mem {:.0} MiB", used)),
        }
    }
    if let Some(temp) = device.avg_temperature_c {
        parts.push(format!("{:.0}°C", temp));
    }
    if let Some(power) = device.avg_power_w {
        parts.push(format!("{:.0} W", power));
    }
    if parts.is_empty() {
        return "no readings".to_string();
    }
    parts.join(", ")
}

/// Print a smoke report.
pub fn print_smoke(report: &SmokeReport) {
    let checks = [
        ("health", &report.results.health),
        ("models", &report.results.models),
        ("chat", &report.results.chat),
        ("completion", &report.results.completion),
    ];
    for (name, check) in checks {
        let status = if check.passed() {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        println!("  {:<11} {}  {}", name, status, first_line(&check.log));
    }
    let overall = if report.passed() {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("Overall: {}", overall);
}

/// Print an error, with the lifecycle diagnostic dump when there is one.
pub fn print_error(error: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), error);

    if let Some(lifecycle) = error.downcast_ref::<LifecycleError>() {
        eprintln!("  Last known state: {}", lifecycle.last_state());
        let logs = lifecycle.logs();
        if !logs.is_empty() {
            eprintln!("  Container logs (last {} lines):", logs.len());
            for line in logs {
                eprintln!("    {}", line.dimmed());
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("4f2a9c0d1e2f3a4b5c6d"), "4f2a9c0d1e2f");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("HTTP 500: boom\ntrace"), "HTTP 500: boom");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn test_device_line() {
        let mut device = DeviceSummary {
            index: 0,
            name: "NVIDIA L4".to_string(),
            avg_utilization_pct: Some(74.6),
            max_utilization_pct: Some(99.0),
            avg_memory_used_mib: Some(11000.0),
            peak_memory_used_mib: Some(12000.0),
            memory_total_mib: Some(23034.0),
            avg_temperature_c: None,
            avg_power_w: Some(70.2),
        };
        assert_eq!(device_line(&device), "util 75%, mem 12000/23034 MiB, 70 W");

        device.avg_utilization_pct = None;
        device.peak_memory_used_mib = None;
        device.avg_power_w = None;
        assert_eq!(device_line(&device), "no readings");
    }

    #[test]
    fn test_progress_hook_advances_bar() {
        let pb = ProgressBar::hidden();
        pb.set_length(2);
        let hook = progress_hook(&pb);
        let outcome = RequestOutcome {
            index: 1,
            status_code: 500,
            latency: std::time::Duration::ZERO,
            error: None,
            text: Some("boom".to_string()),
            completion_tokens: None,
        };

        hook(&outcome);

        assert_eq!(pb.position(), 1);
        assert_eq!(pb.message(), "last failure: HTTP 500");
    }
}
