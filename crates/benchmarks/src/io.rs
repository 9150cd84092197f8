// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Report persistence.
//!
//! Benchmark reports land in `<dir>/<name>_<timestamp>_<run>.json`, smoke
//! reports in `<dir>/smoke_<timestamp>.json`, and a Markdown table of the
//! latest batch in `<dir>/summary.md`. Report files are never overwritten:
//! a name that is already taken gets a numeric suffix.

use crate::markdown;
use crate::result::BenchmarkReport;
use crate::smoke::SmokeReport;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Summary file name.
pub const SUMMARY_FILE: &str = "summary.md";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Writes reports below one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Writer rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the output directory exists.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Write one benchmark report; returns its path.
    pub fn write_benchmark(&self, report: &BenchmarkReport) -> io::Result<PathBuf> {
        let stem = format!(
            "{}_{}_{}",
            file_stem(&report.name),
            report.timestamp.format(TIMESTAMP_FORMAT),
            &report.run_id.simple().to_string()[..8]
        );
        let path = self.write_json(&stem, report)?;
        info!(path = %path.display(), run = %report.name, "Wrote benchmark report");
        Ok(path)
    }

    /// Write every report plus the Markdown summary; returns the report paths.
    pub fn write_benchmarks(&self, reports: &[BenchmarkReport]) -> io::Result<Vec<PathBuf>> {
        let paths = reports
            .iter()
            .map(|report| self.write_benchmark(report))
            .collect::<io::Result<Vec<_>>>()?;
        self.write_summary(reports)?;
        Ok(paths)
    }

    /// Write the Markdown summary of `reports`.
    pub fn write_summary(&self, reports: &[BenchmarkReport]) -> io::Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.dir.join(SUMMARY_FILE);
        fs::write(&path, markdown::generate_summary(reports))?;
        Ok(path)
    }

    /// Write a smoke report as JSON with a Markdown companion; returns the JSON path.
    pub fn write_smoke(&self, report: &SmokeReport) -> io::Result<PathBuf> {
        let stem = format!("smoke_{}", report.test_date.format(TIMESTAMP_FORMAT));
        let path = self.write_json(&stem, report)?;
        fs::write(
            path.with_extension("md"),
            markdown::generate_smoke_report(report),
        )?;
        info!(path = %path.display(), overall = %report.overall_status, "Wrote smoke report");
        Ok(path)
    }

    /// Write `value` to a fresh `<stem>.json` and return its path.
    fn write_json<T: Serialize>(&self, stem: &str, value: &T) -> io::Result<PathBuf> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let mut suffix = 1;
        let mut path = self.dir.join(format!("{}.json", stem));
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    suffix += 1;
                    path = self.dir.join(format!("{}_{}.json", stem, suffix));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read a benchmark report back.
pub fn read_benchmark(path: impl AsRef<Path>) -> io::Result<BenchmarkReport> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Read a smoke report back.
pub fn read_smoke(path: impl AsRef<Path>) -> io::Result<SmokeReport> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::RequestOutcome;
    use crate::smoke::{CheckResult, CheckStatus, SmokeResults};
    use std::time::Duration;
    use xpu_bench_core::{Engine, RequestResult, ResponseShape, ServiceDescriptor};

    fn service() -> ServiceDescriptor {
        ServiceDescriptor::builder("svc", "img:1").port(8001).build().unwrap()
    }

    fn report(name: &str) -> BenchmarkReport {
        let outcome = RequestOutcome::classify(
            1,
            RequestResult::response(200, r#"{"choices":[{"message":{"content":"hi"}}]}"#, Duration::from_millis(80)),
            ResponseShape::ChatCompletion,
        );
        BenchmarkReport::from_outcomes(name, &service(), 1, &[outcome], 0, Duration::from_millis(80))
    }

    #[test]
    fn test_write_and_read_benchmark() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"));

        let original = report("chat");
        let path = writer.write_benchmark(&original).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chat_"));
        assert!(name.ends_with(".json"));

        let loaded = read_benchmark(&path).unwrap();
        assert_eq!(loaded.run_id, original.run_id);
        assert_eq!(loaded.success_count, 1);
        assert_eq!(loaded.service, original.service);
    }

    #[test]
    fn test_write_benchmarks_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());

        let paths = writer
            .write_benchmarks(&[report("technical qa"), report("math")])
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("technical_qa_"));
        let summary = fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("| math |"));
    }

    #[test]
    fn test_write_smoke_report() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let pass = CheckResult {
            status: CheckStatus::Pass,
            log: "ok".to_string(),
        };
        let smoke = SmokeReport::new(
            Engine::Docker,
            &service(),
            SmokeResults {
                health: pass.clone(),
                models: pass.clone(),
                chat: pass.clone(),
                completion: pass,
            },
        );

        let path = writer.write_smoke(&smoke).unwrap();

        assert!(path.with_extension("md").exists());
        let loaded = read_smoke(&path).unwrap();
        assert_eq!(loaded, smoke);
    }

    #[test]
    fn test_same_name_reports_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let first = report("chat");
        let mut second = report("chat");
        second.timestamp = first.timestamp;

        let paths = writer.write_benchmarks(&[first.clone(), second.clone()]).unwrap();

        assert_ne!(paths[0], paths[1]);
        assert_eq!(read_benchmark(&paths[0]).unwrap().run_id, first.run_id);
        assert_eq!(read_benchmark(&paths[1]).unwrap().run_id, second.run_id);
    }

    #[test]
    fn test_identical_reports_get_suffixed_names() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let same = report("chat");

        let first = writer.write_benchmark(&same).unwrap();
        let second = writer.write_benchmark(&same).unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_2.json"));
        let json_files = fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().path().extension().and_then(|e| e.to_str()) == Some("json")
            })
            .count();
        assert_eq!(json_files, 2);
    }

    #[test]
    fn test_read_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let err = read_benchmark(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
