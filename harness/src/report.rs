// report.rs — Report sink contract and the CSV writer collaborator
//
// Drivers talk to the `ReportSink` trait only: per-step timing events plus
// the benchmark header, finalized into a directory. The bundled writer
// produces `report.csv` (header block then one row per event) and
// `summary.csv` (per-label aggregate statistics); the engine additionally
// drops a `run_summary.json` at the report root.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{HarnessError, Result};

// ── Events ─────────────────────────────────────────────────────────────────

/// One timed pipeline step. `iterations` carries the workload-unit count
/// the step covered (1 for latency steps, the result-batch size for an
/// offline operate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingEvent {
    pub event_id: u64,
    pub wall_ns: u64,
    pub cpu_ns: u64,
    pub iterations: u64,
}

/// Injected report sink. The core treats `path` as a directory and assumes
/// nothing else about the format.
pub trait ReportSink {
    fn add_header(&mut self, text: &str);
    fn add_event(&mut self, event: TimingEvent, label: &str);
    fn finalize(&mut self, path: &Path) -> Result<()>;
}

// ── CSV writer ─────────────────────────────────────────────────────────────

/// File-backed sink: buffers everything, writes on finalize.
#[derive(Debug, Default)]
pub struct CsvReportWriter {
    header: String,
    events: Vec<(TimingEvent, String)>,
}

impl CsvReportWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[(TimingEvent, String)] {
        &self.events
    }

    fn write_report(&self, dir: &Path) -> Result<()> {
        let path = dir.join("report.csv");
        let mut text = self.header.clone();
        let mut w = csv::Writer::from_writer(Vec::new());
        w.write_record(["event_id", "label", "iterations", "wall_ns", "cpu_ns"])
            .and_then(|_| {
                self.events.iter().try_for_each(|(e, label)| {
                    w.write_record([
                        e.event_id.to_string(),
                        label.clone(),
                        e.iterations.to_string(),
                        e.wall_ns.to_string(),
                        e.cpu_ns.to_string(),
                    ])
                })
            })
            .map_err(|e| HarnessError::Resource(format!("report.csv: {e}")))?;
        let rows = w
            .into_inner()
            .map_err(|e| HarnessError::Resource(format!("report.csv: {e}")))?;
        text.push_str(&String::from_utf8_lossy(&rows));
        fs::write(&path, text)
            .map_err(|e| HarnessError::Resource(format!("{}: {e}", path.display())))
    }

    fn write_summary(&self, dir: &Path) -> Result<()> {
        let path = dir.join("summary.csv");
        let mut w = csv::Writer::from_path(&path)
            .map_err(|e| HarnessError::Resource(format!("{}: {e}", path.display())))?;
        w.write_record([
            "event_id",
            "label",
            "count",
            "iterations",
            "mean_wall_ms",
            "stddev_wall_ms",
            "min_wall_ms",
            "max_wall_ms",
        ])
        .map_err(|e| HarnessError::Resource(format!("summary.csv: {e}")))?;

        // Aggregate in first-seen order so the summary mirrors pipeline order.
        let mut order: Vec<(u64, String)> = Vec::new();
        for (e, label) in &self.events {
            let key = (e.event_id, label.clone());
            if !order.contains(&key) {
                order.push(key);
            }
        }
        for (event_id, label) in order {
            let samples: Vec<f64> = self
                .events
                .iter()
                .filter(|(e, l)| e.event_id == event_id && *l == label)
                .map(|(e, _)| e.wall_ns as f64 / 1e6)
                .collect();
            let iterations: u64 = self
                .events
                .iter()
                .filter(|(e, l)| e.event_id == event_id && *l == label)
                .map(|(e, _)| e.iterations)
                .sum();
            let (mean, stddev) = mean_stddev(&samples);
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            w.write_record([
                event_id.to_string(),
                label,
                samples.len().to_string(),
                iterations.to_string(),
                format!("{mean:.6}"),
                format!("{stddev:.6}"),
                format!("{min:.6}"),
                format!("{max:.6}"),
            ])
            .map_err(|e| HarnessError::Resource(format!("summary.csv: {e}")))?;
        }
        w.flush()
            .map_err(|e| HarnessError::Resource(format!("summary.csv: {e}")))
    }
}

/// Mean and sample standard deviation of a nonempty slice.
fn mean_stddev(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if samples.len() < 2 {
        return (mean, 0.0);
    }
    let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

impl ReportSink for CsvReportWriter {
    fn add_header(&mut self, text: &str) {
        self.header.push_str(text);
    }

    fn add_event(&mut self, event: TimingEvent, label: &str) {
        self.events.push((event, label.to_string()));
    }

    fn finalize(&mut self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .map_err(|e| HarnessError::Resource(format!("{}: {e}", path.display())))?;
        self.write_report(path)?;
        self.write_summary(path)
    }
}

/// Record a failure line inside the benchmark's report directory.
pub fn write_failure(dir: &Path, line: &str) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| HarnessError::Resource(format!("{}: {e}", dir.display())))?;
    let path = dir.join("failure.txt");
    fs::write(&path, format!("{line}\n"))
        .map_err(|e| HarnessError::Resource(format!("{}: {e}", path.display())))
}

// ── Run summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRecord {
    pub path: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub backend_lib_path: String,
    pub random_seed: u64,
    pub benchmarks: Vec<BenchmarkRecord>,
}

/// Write `run_summary.json` at the report root.
pub fn write_run_summary(root: &Path, summary: &RunSummary) -> Result<()> {
    fs::create_dir_all(root)
        .map_err(|e| HarnessError::Resource(format!("{}: {e}", root.display())))?;
    let path = root.join("run_summary.json");
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| HarnessError::Resource(format!("run summary: {e}")))?;
    fs::write(&path, json)
        .map_err(|e| HarnessError::Resource(format!("{}: {e}", path.display())))
}

// ── Tests ──────────────────────────────────────────────────────────────────
