// latency.rs — Latency category driver
//
// Runs the whole pipeline once per iteration on a single sample (the
// first of each parameter's batch). Protocol: `warmup_iterations` untimed
// passes, then measured passes until both `iterations ≥ 2` and the summed
// measured wall time reaches max(descriptor.min_test_time_ms,
// config.min_test_time_ms). The sink aggregates statistics; the driver
// only emits per-iteration step events.

use crate::bench::PartialBenchmark;
use crate::engine::CancelFlag;
use crate::error::Result;
use crate::report::ReportSink;
use crate::validate;
use crate::workload::CategoryParams;

/// Minimum number of measured iterations.
const MIN_ITERATIONS: u64 = 2;

pub struct LatencyDriver {
    bench: PartialBenchmark,
    warmup_iterations: u64,
    min_test_time_ms: u64,
}

impl LatencyDriver {
    /// Per-parameter batch sizes for a latency run: one sample each.
    pub fn batch_sizes(bench: &PartialBenchmark) -> Vec<u64> {
        vec![1; bench.workload().op_param_count()]
    }

    pub fn new(bench: PartialBenchmark) -> Self {
        let (warmup_iterations, descriptor_ms) = match bench.descriptor().cat_params {
            CategoryParams::Latency {
                warmup_iterations,
                min_test_time_ms,
            } => (warmup_iterations, min_test_time_ms),
            // A mismatched category never reaches the factory; treat it as
            // zero-configured rather than panicking.
            CategoryParams::Offline { .. } => (0, 0),
        };
        let min_test_time_ms = bench.config().effective_min_test_time_ms(descriptor_ms);
        Self {
            bench,
            warmup_iterations,
            min_test_time_ms,
        }
    }

    /// Execute the full latency protocol and validate the last decoded
    /// result.
    pub fn run(&mut self, sink: &mut dyn ReportSink, cancel: &CancelFlag) -> Result<()> {
        self.bench.ensure_ready()?;
        sink.add_header(self.bench.token().header());

        for _ in 0..self.warmup_iterations {
            let _ = self.bench.run_pipeline_unit(None, 1, cancel)?;
        }

        // Elapsed time is the sum of the emitted step walls, so the
        // reported events always account for the full measurement window.
        let mut measured_ns = 0u64;
        let mut iterations = 0u64;
        let mut last_result = None;
        while iterations < MIN_ITERATIONS || measured_ns < self.min_test_time_ms * 1_000_000 {
            cancel.check()?;
            let run = self.bench.run_pipeline_unit(Some(sink), 1, cancel)?;
            measured_ns += run.step_wall_ns;
            iterations += 1;
            last_result = Some(run.actual);
        }
        log::debug!(
            "latency: {iterations} measured iterations over {:.2} ms for {}",
            measured_ns as f64 / 1e6,
            self.bench.token().report_path()
        );

        let actual = last_result.expect("loop runs at least twice");
        validate::validate(self.bench.data()?, &actual, self.bench.config())
    }
}
