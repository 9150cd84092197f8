// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Markdown rendering of benchmark and smoke reports.

use crate::result::BenchmarkReport;
use crate::smoke::SmokeReport;
use std::fmt::Write;

/// Summary table across benchmark reports.
pub fn generate_summary(reports: &[BenchmarkReport]) -> String {
    let mut output = String::new();

    writeln!(output, "# Benchmark Summary").unwrap();
    writeln!(output).unwrap();
    writeln!(output, "Generated: {}", chrono::Utc::now().to_rfc3339()).unwrap();
    writeln!(output).unwrap();
    writeln!(
        output,
        "| Run | Image | Concurrency | Requests | Success Rate | Skipped | Throughput (req/s) | Tokens/s | p50 (ms) | p95 (ms) |"
    )
    .unwrap();
    writeln!(
        output,
        "|-----|-------|-------------|----------|--------------|---------|--------------------|----------|----------|----------|"
    )
    .unwrap();

    for report in reports {
        writeln!(
            output,
            "| {} | {} | {} | {} | {:.1}% | {} | {:.2} | {:.1} | {} | {} |",
            report.name,
            report.service.image(),
            report.concurrency,
            report.total_requests,
            report.success_rate() * 100.0,
            report.skipped,
            report.throughput_per_second,
            report.tokens_per_second,
            report.latency.p50.as_millis(),
            report.latency.p95.as_millis(),
        )
        .unwrap();
    }

    let failures: Vec<_> = reports.iter().filter(|r| r.failure_count > 0).collect();
    if !failures.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "## Failures").unwrap();
        writeln!(output).unwrap();
        for report in failures {
            let f = &report.failures;
            writeln!(
                output,
                "- **{}**: {} failed (http {}, network {}, timeout {}, protocol {})",
                report.name, report.failure_count, f.http, f.network, f.timeout, f.protocol
            )
            .unwrap();
        }
    }

    let sampled: Vec<_> = reports
        .iter()
        .filter_map(|r| r.telemetry.as_ref().map(|t| (&r.name, t)))
        .collect();
    if !sampled.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "## Accelerator Telemetry").unwrap();
        writeln!(output).unwrap();
        writeln!(
            output,
            "| Run | Hardware | Device | Avg Util (%) | Peak Memory (MiB) | Avg Temp (C) | Avg Power (W) |"
        )
        .unwrap();
        writeln!(
            output,
            "|-----|----------|--------|--------------|-------------------|--------------|---------------|"
        )
        .unwrap();
        for (name, telemetry) in sampled {
            for device in &telemetry.devices {
                writeln!(
                    output,
                    "| {} | {} | {} {} | {} | {} | {} | {} |",
                    name,
                    telemetry.hardware,
                    device.index,
                    device.name,
                    cell(device.avg_utilization_pct),
                    cell(device.peak_memory_used_mib),
                    cell(device.avg_temperature_c),
                    cell(device.avg_power_w),
                )
                .unwrap();
            }
        }
    }

    writeln!(output).unwrap();
    writeln!(output, "---").unwrap();
    writeln!(output, "Total runs: {}", reports.len()).unwrap();

    output
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

/// Smoke test report as a check list.
pub fn generate_smoke_report(report: &SmokeReport) -> String {
    let mut output = String::new();

    writeln!(output, "# Smoke Test").unwrap();
    writeln!(output).unwrap();
    writeln!(output, "**Date:** {}", report.test_date.to_rfc3339()).unwrap();
    writeln!(output, "**Engine:** {}", report.container_tool).unwrap();
    writeln!(output, "**Image:** {}", report.image).unwrap();
    writeln!(output, "**Port:** {}", report.port).unwrap();
    writeln!(output).unwrap();
    writeln!(output, "| Check | Status | Log |").unwrap();
    writeln!(output, "|-------|--------|-----|").unwrap();

    let checks = [
        ("health", &report.results.health),
        ("models", &report.results.models),
        ("chat", &report.results.chat),
        ("completion", &report.results.completion),
    ];
    for (name, check) in checks {
        writeln!(output, "| {} | {} | {} |", name, check.status, table_cell(&check.log)).unwrap();
    }

    writeln!(output).unwrap();
    writeln!(output, "**Overall:** {}", report.overall_status).unwrap();

    output
}

fn table_cell(text: &str) -> String {
    let flat = text.replace('\n', " ").replace('|', "\\|");
    if flat.chars().count() > 80 {
        let short: String = flat.chars().take(77).collect();
        format!("{}...", short)
    } else {
        flat
    }
}
