// engine.rs — Engine, benchmark factory, and run orchestration
//
// Holds exactly one backend instance for the process lifetime and one
// registered matcher per cataloged workload. A run enumerates the
// backend's descriptors, expands the harness's default workload-parameter
// sets, matches, and then builds and executes each benchmark in
// enumeration order. Backend and validation failures are absorbed per
// benchmark; config and resource failures abort the run.

use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::abi::BackendApi;
use crate::bench::PartialBenchmark;
use crate::config::Config;
use crate::datagen;
use crate::error::{HarnessError, Result};
use crate::latency::LatencyDriver;
use crate::matcher::{DescriptionToken, WorkloadMatcher};
use crate::offline::OfflineDriver;
use crate::report::{self, BenchmarkRecord, CsvReportWriter, RunStatus, ReportSink};
use crate::workload::{Category, Workload, WorkloadParam, ALL_WORKLOADS};

// ── Cancellation ───────────────────────────────────────────────────────────

/// Shared SIGINT flag. The engine checks it between pipeline steps and
/// between benchmarks; the in-flight backend call always completes first.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(HarnessError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ── Default workload parameters ────────────────────────────────────────────

/// The workload-parameter sets the harness proposes per workload when the
/// backend leaves them open.
fn default_param_sets(workload: Workload) -> Vec<Vec<WorkloadParam>> {
    match workload {
        Workload::EltwiseAdd | Workload::EltwiseMult | Workload::DotProduct => vec![
            vec![WorkloadParam::UInt64(100)],
            vec![WorkloadParam::UInt64(1000)],
        ],
        Workload::MatrixMultiply => vec![vec![
            WorkloadParam::UInt64(10),
            WorkloadParam::UInt64(10),
            WorkloadParam::UInt64(10),
        ]],
        Workload::LogReg
        | Workload::LogRegPolyD3
        | Workload::LogRegPolyD5
        | Workload::LogRegPolyD7 => vec![vec![WorkloadParam::UInt64(16)]],
    }
}

// ── Run outcome ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RunOutcome {
    pub records: Vec<BenchmarkRecord>,
    pub failed: usize,
    pub cancelled: bool,
}

// ── Engine ─────────────────────────────────────────────────────────────────

pub struct Engine {
    backend: Rc<dyn BackendApi>,
    matchers: Vec<WorkloadMatcher>,
    config: Config,
    seed: u64,
}

impl Engine {
    /// Resolve the run seed exactly once, seed the global generator, and
    /// register one matcher per workload.
    pub fn new(backend: Rc<dyn BackendApi>, config: Config) -> Result<Self> {
        config.validate()?;
        let seed = config.effective_seed();
        datagen::seed_global(seed);
        log::info!("engine start, seed {seed}");
        let matchers = ALL_WORKLOADS.iter().map(|&w| WorkloadMatcher::new(w)).collect();
        Ok(Self {
            backend,
            matchers,
            config,
            seed,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The seed this run actually used. Callers recording the seed (e.g.
    /// into `run_summary.json`) must read it here rather than re-deriving
    /// it from the config; a clock-derived seed is not stable across
    /// calls.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Enumerate the backend's benchmarks and issue a token for every
    /// (descriptor, workload-param set) pair the harness recognizes.
    /// Returns `(matcher index, token)` pairs in enumeration order.
    pub fn enumerate(&self) -> Result<Vec<(usize, DescriptionToken)>> {
        let handles = self.backend.subscribe_benchmarks()?;
        log::info!("backend advertises {} benchmarks", handles.len());

        let mut matched = Vec::new();
        for handle in handles {
            let descriptor = match self.backend.describe(handle) {
                Ok(d) => d,
                Err(e) if e.is_recoverable() => {
                    log::warn!("skipping benchmark handle {handle:#x}: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let declared = match self.backend.workload_param_count(handle) {
                Ok(n) => n,
                Err(e) if e.is_recoverable() => {
                    log::warn!("skipping benchmark handle {handle:#x}: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut accepted = false;
            'matchers: for (index, matcher) in self.matchers.iter().enumerate() {
                let mut tokens = Vec::new();
                for params in default_param_sets(matcher.workload()) {
                    if matcher.try_match(&descriptor, &params).is_none() {
                        continue;
                    }
                    if declared as usize != params.len() {
                        log::warn!(
                            "backend declares {declared} workload params for {}, harness \
                             expects {}; skipping",
                            matcher.workload(),
                            params.len()
                        );
                        continue 'matchers;
                    }
                    match matcher.seal(
                        self.backend.as_ref(),
                        handle,
                        descriptor.clone(),
                        params,
                        self.config.clone(),
                    ) {
                        Ok(token) => tokens.push((index, token)),
                        Err(e) if e.is_recoverable() => {
                            log::warn!("cannot seal benchmark handle {handle:#x}: {e}");
                        }
                        Err(e) => return Err(e),
                    }
                }
                if !tokens.is_empty() {
                    // First matcher that accepts wins.
                    matched.append(&mut tokens);
                    accepted = true;
                    break;
                }
            }
            if !accepted {
                log::warn!(
                    "no matcher supports workload {:#x} (handle {handle:#x})",
                    descriptor.workload
                );
            }
        }
        Ok(matched)
    }

    /// Construct a benchmark from a token: unseal, generate data, bring the
    /// backend handle up through the three init phases.
    fn build_benchmark(&self, matcher_index: usize, token: DescriptionToken) -> Result<PartialBenchmark> {
        let matcher = &self.matchers[matcher_index];
        let mut bench = PartialBenchmark::new(self.backend.clone(), token, matcher.id())?;
        let batch_sizes = match bench.descriptor().category {
            Category::Latency => LatencyDriver::batch_sizes(&bench),
            Category::Offline => OfflineDriver::batch_sizes(&bench),
        };
        // Each benchmark draws from a seed bound to its canonical path, so
        // a --filter re-run regenerates the same bytes for the benchmarks
        // it keeps.
        datagen::seed_global(datagen::derive_seed(self.seed, bench.token().report_path()));
        bench.init(&batch_sizes)?;
        bench.init_backend()?;
        bench.post_init()?;
        Ok(bench)
    }

    /// Run every matched benchmark, writing reports under `report_root`.
    pub fn run(
        &self,
        report_root: &Path,
        filter: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome> {
        let matched = self.enumerate()?;
        let mut records = Vec::new();
        let mut failed = 0usize;
        let mut cancelled = false;

        for (matcher_index, token) in matched {
            let path = token.report_path().to_string();
            if let Some(needle) = filter {
                if !path.contains(needle) {
                    records.push(BenchmarkRecord {
                        path,
                        status: RunStatus::Skipped,
                        message: Some("filtered out".into()),
                    });
                    continue;
                }
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            log::info!("running {path}");
            let dir = report_root.join(&path);
            match self.run_one(matcher_index, token, &dir, cancel) {
                Ok(()) => {
                    log::info!("finished {path}");
                    records.push(BenchmarkRecord {
                        path,
                        status: RunStatus::Ok,
                        message: None,
                    });
                }
                Err(HarnessError::Cancelled) => {
                    let line = format!("[FAILED] {path}: Cancelled: interrupted");
                    eprintln!("{line}");
                    let _ = report::write_failure(&dir, &line);
                    records.push(BenchmarkRecord {
                        path,
                        status: RunStatus::Failed,
                        message: Some("cancelled".into()),
                    });
                    cancelled = true;
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    failed += 1;
                    let line = format!("[FAILED] {path}: {}: {e}", e.kind());
                    eprintln!("{line}");
                    log::error!("{line}");
                    let _ = report::write_failure(&dir, &line);
                    records.push(BenchmarkRecord {
                        path,
                        status: RunStatus::Failed,
                        message: Some(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RunOutcome {
            records,
            failed,
            cancelled,
        })
    }

    /// Build and drive one benchmark; the sink is finalized even on
    /// failure so accumulated events are flushed.
    fn run_one(
        &self,
        matcher_index: usize,
        token: DescriptionToken,
        dir: &Path,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let bench = self.build_benchmark(matcher_index, token)?;
        let mut sink = CsvReportWriter::new();
        let category = bench.descriptor().category;
        let result = match category {
            Category::Latency => LatencyDriver::new(bench).run(&mut sink, cancel),
            Category::Offline => OfflineDriver::new(bench).run(&mut sink, cancel),
        };
        let flushed = sink.finalize(dir);
        match result {
            Ok(()) => flushed,
            Err(e) => {
                if let Err(flush_err) = flushed {
                    log::warn!("could not flush report for failed benchmark: {flush_err}");
                }
                Err(e)
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check().is_ok());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(HarnessError::Cancelled)));
    }

    #[test]
    fn default_param_sets_match_arity() {
        for w in ALL_WORKLOADS {
            for set in default_param_sets(w) {
                assert_eq!(set.len(), w.workload_param_count(), "{w}");
                assert!(set.iter().all(|p| p.as_u64().is_some()));
            }
        }
    }
}
