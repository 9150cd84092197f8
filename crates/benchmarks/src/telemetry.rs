// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Accelerator telemetry sampled while a benchmark runs.
//!
//! A [`TelemetrySampler`] polls a [`TelemetrySource`] from a background task
//! at a fixed interval and reduces what it saw to per-device averages when
//! the run ends. [`VendorTool`] reads NVIDIA GPUs through `nvidia-smi` and
//! Ascend NPUs through `npu-smi`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default pause between samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

const NVIDIA_QUERY: &str =
    "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw";

/// Accelerator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareKind {
    /// NVIDIA GPUs.
    Nvidia,
    /// Huawei Ascend NPUs.
    Ascend,
}

impl fmt::Display for HardwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvidia => f.write_str("nvidia"),
            Self::Ascend => f.write_str("ascend"),
        }
    }
}

/// Telemetry query failure.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The vendor tool could not be run or exited with an error.
    #[error("{tool} failed: {message}")]
    Command {
        /// Tool binary.
        tool: &'static str,
        /// What went wrong.
        message: String,
    },
    /// The tool's output could not be understood.
    #[error("unexpected {tool} output: {message}")]
    Parse {
        /// Tool binary.
        tool: &'static str,
        /// What went wrong.
        message: String,
    },
}

/// One device reading. Fields the tool reports as unavailable are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    /// Device index.
    pub index: u32,
    /// Device model.
    pub name: String,
    /// Compute utilization in percent.
    pub utilization_pct: Option<f64>,
    /// Device memory in use, MiB.
    pub memory_used_mib: Option<f64>,
    /// Device memory capacity, MiB.
    pub memory_total_mib: Option<f64>,
    /// Temperature in °C.
    pub temperature_c: Option<f64>,
    /// Power draw in watts.
    pub power_w: Option<f64>,
}

/// Something that can report the current state of every accelerator.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Accelerator family this source reads.
    fn hardware(&self) -> HardwareKind;

    /// Read every device once.
    async fn sample(&self) -> Result<Vec<DeviceSample>, TelemetryError>;
}

/// Vendor management tool run as a child process per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorTool {
    hardware: HardwareKind,
}

impl VendorTool {
    /// `nvidia-smi`.
    pub fn nvidia() -> Self {
        Self {
            hardware: HardwareKind::Nvidia,
        }
    }

    /// `npu-smi`.
    pub fn ascend() -> Self {
        Self {
            hardware: HardwareKind::Ascend,
        }
    }

    fn program(&self) -> &'static str {
        match self.hardware {
            HardwareKind::Nvidia => "nvidia-smi",
            HardwareKind::Ascend => "npu-smi",
        }
    }

    fn args(&self) -> &'static [&'static str] {
        match self.hardware {
            HardwareKind::Nvidia => &[NVIDIA_QUERY, "--format=csv,noheader,nounits"],
            HardwareKind::Ascend => &["info"],
        }
    }
}

#[async_trait]
impl TelemetrySource for VendorTool {
    fn hardware(&self) -> HardwareKind {
        self.hardware
    }

    async fn sample(&self) -> Result<Vec<DeviceSample>, TelemetryError> {
        let tool = self.program();
        let mut command = Command::new(tool);
        command
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(QUERY_TIMEOUT, command.output())
            .await
            .map_err(|_| TelemetryError::Command {
                tool,
                message: format!("no answer within {}s", QUERY_TIMEOUT.as_secs()),
            })?
            .map_err(|e| TelemetryError::Command {
                tool,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TelemetryError::Command {
                tool,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match self.hardware {
            HardwareKind::Nvidia => parse_nvidia_csv(&stdout),
            HardwareKind::Ascend => parse_npu_smi(&stdout),
        }
    }
}

/// First vendor tool that reports at least one device.
pub async fn detect_source() -> Option<Arc<dyn TelemetrySource>> {
    let candidates: Vec<Arc<dyn TelemetrySource>> = vec![
        Arc::new(VendorTool::nvidia()),
        Arc::new(VendorTool::ascend()),
    ];
    detect_source_from(candidates).await
}

/// Return the first source in `candidates` that yields a sample.
pub async fn detect_source_from(
    candidates: Vec<Arc<dyn TelemetrySource>>,
) -> Option<Arc<dyn TelemetrySource>> {
    for source in candidates {
        match source.sample().await {
            Ok(devices) => {
                info!(hardware = %source.hardware(), devices = devices.len(), "Detected accelerators");
                return Some(source);
            }
            Err(e) => debug!(hardware = %source.hardware(), error = %e, "Telemetry source unavailable"),
        }
    }
    info!("No accelerator telemetry available");
    None
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output.
pub fn parse_nvidia_csv(output: &str) -> Result<Vec<DeviceSample>, TelemetryError> {
    let parse_error = |message: String| TelemetryError::Parse {
        tool: "nvidia-smi",
        message,
    };

    let devices = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 7 {
                return Err(parse_error(format!("expected 7 fields in '{}'", line)));
            }
            let index = fields[0]
                .parse()
                .map_err(|_| parse_error(format!("bad device index '{}'", fields[0])))?;
            Ok(DeviceSample {
                index,
                name: fields[1].to_string(),
                utilization_pct: reading(fields[2]),
                memory_used_mib: reading(fields[3]),
                memory_total_mib: reading(fields[4]),
                temperature_c: reading(fields[5]),
                power_w: reading(fields[6]),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if devices.is_empty() {
        return Err(parse_error("no devices listed".to_string()));
    }
    Ok(devices)
}

/// Parse the device table printed by `npu-smi info`.
///
/// Each NPU spans two rows: `index name | health | power temp ...` and
/// `chip | bus id | aicore% used / total ...`. The last `used / total`
/// pair of the second row is HBM.
pub fn parse_npu_smi(output: &str) -> Result<Vec<DeviceSample>, TelemetryError> {
    let rows: Vec<Vec<Vec<&str>>> = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .map(|line| {
            line.trim_matches('|')
                .split('|')
                .map(|cell| cell.split_whitespace().collect())
                .collect()
        })
        .collect();

    let mut devices = Vec::new();
    let mut rows = rows.iter().peekable();
    while let Some(row) = rows.next() {
        let Some(mut device) = npu_device_row(row) else {
            continue;
        };
        if let Some(chip) = rows.next_if(|next| is_npu_chip_row(next)) {
            let usage = &chip[2];
            device.utilization_pct = usage.first().and_then(|t| t.parse().ok());
            if let Some(&(used, total)) = usage_pairs(usage).last() {
                device.memory_used_mib = Some(used);
                device.memory_total_mib = Some(total);
            }
        }
        devices.push(device);
    }

    if devices.is_empty() {
        return Err(TelemetryError::Parse {
            tool: "npu-smi",
            message: "no NPU rows found".to_string(),
        });
    }
    Ok(devices)
}

fn npu_device_row(row: &[Vec<&str>]) -> Option<DeviceSample> {
    let (ids, readings) = (row.first()?, row.get(2)?);
    if ids.len() < 2 {
        return None;
    }
    let index = ids[0].parse().ok()?;
    let power_w = readings.first()?.parse().ok()?;
    let temperature_c = readings.get(1)?.parse().ok()?;
    Some(DeviceSample {
        index,
        name: ids[1..].join(" "),
        utilization_pct: None,
        memory_used_mib: None,
        memory_total_mib: None,
        temperature_c: Some(temperature_c),
        power_w: Some(power_w),
    })
}

fn is_npu_chip_row(row: &[Vec<&str>]) -> bool {
    row.len() >= 3 && row[0].len() == 1 && row[0][0].parse::<u32>().is_ok()
}

fn usage_pairs(tokens: &[&str]) -> Vec<(f64, f64)> {
    tokens
        .windows(3)
        .filter(|w| w[1] == "/")
        .filter_map(|w| Some((w[0].parse().ok()?, w[2].parse().ok()?)))
        .collect()
}

fn reading(field: &str) -> Option<f64> {
    field.parse().ok()
}

/// Per-device aggregate over a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Device index.
    pub index: u32,
    /// Device model.
    pub name: String,
    /// Mean utilization in percent.
    pub avg_utilization_pct: Option<f64>,
    /// Highest utilization seen.
    pub max_utilization_pct: Option<f64>,
    /// Mean memory in use, MiB.
    pub avg_memory_used_mib: Option<f64>,
    /// Highest memory in use, MiB.
    pub peak_memory_used_mib: Option<f64>,
    /// Memory capacity, MiB.
    pub memory_total_mib: Option<f64>,
    /// Mean temperature in °C.
    pub avg_temperature_c: Option<f64>,
    /// Mean power draw in watts.
    pub avg_power_w: Option<f64>,
}

/// Telemetry attached to a benchmark report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    /// Accelerator family.
    pub hardware: HardwareKind,
    /// Successful samples.
    pub samples: usize,
    /// Samples the tool failed to produce.
    pub failed_samples: usize,
    /// Time from the first sample to the end of the run.
    pub duration: Duration,
    /// Aggregates ordered by device index.
    pub devices: Vec<DeviceSummary>,
}

impl TelemetrySummary {
    /// Reduce raw samples, one `Vec` per poll, to per-device aggregates.
    pub fn from_samples(
        hardware: HardwareKind,
        samples: &[Vec<DeviceSample>],
        failed_samples: usize,
        duration: Duration,
    ) -> Self {
        let mut by_device: BTreeMap<u32, Vec<&DeviceSample>> = BTreeMap::new();
        for sample in samples.iter().flatten() {
            by_device.entry(sample.index).or_default().push(sample);
        }

        let devices = by_device
            .into_iter()
            .map(|(index, readings)| DeviceSummary {
                index,
                name: readings.first().map(|s| s.name.clone()).unwrap_or_default(),
                avg_utilization_pct: mean(readings.iter().filter_map(|s| s.utilization_pct)),
                max_utilization_pct: peak(readings.iter().filter_map(|s| s.utilization_pct)),
                avg_memory_used_mib: mean(readings.iter().filter_map(|s| s.memory_used_mib)),
                peak_memory_used_mib: peak(readings.iter().filter_map(|s| s.memory_used_mib)),
                memory_total_mib: readings.iter().rev().find_map(|s| s.memory_total_mib),
                avg_temperature_c: mean(readings.iter().filter_map(|s| s.temperature_c)),
                avg_power_w: mean(readings.iter().filter_map(|s| s.power_w)),
            })
            .collect();

        Self {
            hardware,
            samples: samples.len(),
            failed_samples,
            duration,
            devices,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn peak(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
}

/// Background sampler for the duration of one run.
pub struct TelemetrySampler {
    hardware: HardwareKind,
    started: Instant,
    stop: oneshot::Sender<()>,
    task: JoinHandle<(Vec<Vec<DeviceSample>>, usize)>,
}

impl TelemetrySampler {
    /// Start polling `source` every `interval`. The first sample is taken
    /// immediately.
    pub fn start(source: Arc<dyn TelemetrySource>, interval: Duration) -> Self {
        let hardware = source.hardware();
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut samples = Vec::new();
            let mut failed = 0;
            loop {
                match source.sample().await {
                    Ok(devices) => {
                        record_gauges(&devices);
                        samples.push(devices);
                    }
                    Err(e) => {
                        failed += 1;
                        debug!(error = %e, "Telemetry sample failed");
                    }
                }
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            (samples, failed)
        });

        debug!(hardware = %hardware, interval_ms = interval.as_millis() as u64, "Started telemetry sampler");
        Self {
            hardware,
            started: Instant::now(),
            stop,
            task,
        }
    }

    /// Stop polling and summarize. A sample in progress is allowed to finish.
    pub async fn finish(self) -> TelemetrySummary {
        let duration = self.started.elapsed();
        let _ = self.stop.send(());
        let (samples, failed) = match self.task.await {
            Ok(collected) => collected,
            Err(e) => {
                warn!(error = %e, "Telemetry sampler failed");
                (Vec::new(), 0)
            }
        };
        TelemetrySummary::from_samples(self.hardware, &samples, failed, duration)
    }
}

fn record_gauges(devices: &[DeviceSample]) {
    for device in devices {
        let label = device.index.to_string();
        if let Some(utilization) = device.utilization_pct {
            metrics::gauge!("xpu_bench_accelerator_utilization_percent", "device" => label.clone())
                .set(utilization);
        }
        if let Some(used) = device.memory_used_mib {
            metrics::gauge!("xpu_bench_accelerator_memory_used_mib", "device" => label).set(used);
        }
    }
}
