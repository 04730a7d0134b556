// offline.rs — Offline (batch throughput) category driver
//
// Runs the pipeline once across the entire input batch. Per parameter `i`
// the sample count is `offline.data_count[i]` when nonzero, else
// `config.default_sample_size`; the result batch is the Cartesian
// product. `operate` is invoked exactly once and its event's `iterations`
// field records the total result count for throughput computation.

use crate::bench::PartialBenchmark;
use crate::engine::CancelFlag;
use crate::error::Result;
use crate::report::ReportSink;
use crate::validate;
use crate::workload::{CategoryParams, MAX_OP_PARAMS};

pub struct OfflineDriver {
    bench: PartialBenchmark,
}

impl OfflineDriver {
    /// Per-parameter batch sizes for an offline run.
    pub fn batch_sizes(bench: &PartialBenchmark) -> Vec<u64> {
        let default = bench.config().default_sample_size;
        let data_count = match bench.descriptor().cat_params {
            CategoryParams::Offline { data_count } => data_count,
            CategoryParams::Latency { .. } => [0u64; MAX_OP_PARAMS],
        };
        (0..bench.workload().op_param_count())
            .map(|i| {
                let declared = data_count[i];
                if declared != 0 {
                    declared
                } else {
                    default
                }
            })
            .collect()
    }

    pub fn new(bench: PartialBenchmark) -> Self {
        Self { bench }
    }

    /// Single full-batch pass, then validation of every coordinate.
    pub fn run(&mut self, sink: &mut dyn ReportSink, cancel: &CancelFlag) -> Result<()> {
        self.bench.ensure_ready()?;
        sink.add_header(self.bench.token().header());

        let result_count = self.bench.data()?.space.cardinality();
        let run = self
            .bench
            .run_pipeline_unit(Some(sink), result_count, cancel)?;
        log::debug!(
            "offline: {result_count} results in one pass for {}",
            self.bench.token().report_path()
        );
        validate::validate(self.bench.data()?, &run.actual, self.bench.config())
    }
}
