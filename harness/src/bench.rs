// bench.rs — Partial benchmark scaffold and the shared pipeline pass
//
// Owns the BenchHandle for exactly the benchmark's lifetime and enforces
// the three-phase bring-up init() → init_backend() → post_init(); any
// pipeline call before the final phase fails with PreconditionFailed.
// Both category drivers execute the same pipeline shape through
// `run_pipeline_unit`, which times every step and reports it to the sink.

use std::rc::Rc;
use std::time::Instant;

use cpu_time::ProcessTime;

use crate::abi::{BackendApi, BackendHandle};
use crate::config::Config;
use crate::datagen::{self, GeneratedData};
use crate::engine::CancelFlag;
use crate::error::{HarnessError, Result};
use crate::matcher::{DescriptionToken, MatcherId};
use crate::pack::DataPack;
use crate::report::{ReportSink, TimingEvent};
use crate::workload::{BenchmarkDescriptor, Workload, WorkloadParam};

// ── Pipeline steps ─────────────────────────────────────────────────────────

/// Pipeline steps in execution order; the ordinal is added to the
/// category's event-id offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Encode = 1,
    Encrypt = 2,
    Load = 3,
    Operate = 4,
    Store = 5,
    Decrypt = 6,
    Decode = 7,
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Step::Encode => "encode",
            Step::Encrypt => "encrypt",
            Step::Load => "load",
            Step::Operate => "operate",
            Step::Store => "store",
            Step::Decrypt => "decrypt",
            Step::Decode => "decode",
        }
    }
}

/// Outcome of one pipeline pass: the decoded result packs and the summed
/// wall time of the executed steps.
#[derive(Debug)]
pub struct PipelineRun {
    pub actual: Vec<DataPack>,
    pub step_wall_ns: u64,
}

// ── Lifecycle ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitStage {
    Created,
    DataReady,
    BackendReady,
    Ready,
}

/// A benchmark bound to its backend handle and generated data. The handle
/// is destroyed exactly once on teardown, including failure paths.
pub struct PartialBenchmark {
    backend: Rc<dyn BackendApi>,
    token: DescriptionToken,
    bench_handle: u64,
    descriptor: BenchmarkDescriptor,
    w_params: Vec<WorkloadParam>,
    config: Config,
    workload: Workload,
    handle: Option<BackendHandle>,
    stage: InitStage,
    data: Option<GeneratedData>,
}

impl std::fmt::Debug for PartialBenchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialBenchmark")
            .field("bench_handle", &self.bench_handle)
            .field("descriptor", &self.descriptor)
            .field("w_params", &self.w_params)
            .field("config", &self.config)
            .field("workload", &self.workload)
            .field("stage", &self.stage)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl PartialBenchmark {
    /// Open the token with the presenting matcher's identity. Construction
    /// fails with PreconditionFailed when the identities differ.
    pub fn new(
        backend: Rc<dyn BackendApi>,
        token: DescriptionToken,
        caller: MatcherId,
    ) -> Result<Self> {
        let unsealed = token.unseal(caller)?;
        let bench_handle = unsealed.bench_handle;
        let descriptor = unsealed.descriptor.clone();
        let w_params = unsealed.w_params.to_vec();
        let config = unsealed.config.clone();
        let workload = token.workload();
        Ok(Self {
            backend,
            token,
            bench_handle,
            descriptor,
            w_params,
            config,
            workload,
            handle: None,
            stage: InitStage::Created,
            data: None,
        })
    }

    pub fn token(&self) -> &DescriptionToken {
        &self.token
    }

    pub fn descriptor(&self) -> &BenchmarkDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workload(&self) -> Workload {
        self.workload
    }

    /// Phase 1: generate inputs and ground truth for the given per-
    /// parameter batch sizes.
    pub fn init(&mut self, batch_sizes: &[u64]) -> Result<()> {
        self.expect_stage(InitStage::Created, "init")?;
        self.data = Some(datagen::generate(
            self.workload,
            &self.w_params,
            self.descriptor.data_type,
            batch_sizes,
        )?);
        self.stage = InitStage::DataReady;
        Ok(())
    }

    /// Phase 2: instantiate the benchmark on the backend.
    pub fn init_backend(&mut self) -> Result<()> {
        self.expect_stage(InitStage::DataReady, "init_backend")?;
        let raw = self
            .backend
            .init_benchmark(self.bench_handle, &self.w_params)?;
        self.handle = Some(BackendHandle::new(raw, self.backend.clone()));
        self.stage = InitStage::BackendReady;
        Ok(())
    }

    /// Phase 3: flip the readiness flag; the pipeline is callable after.
    pub fn post_init(&mut self) -> Result<()> {
        self.expect_stage(InitStage::BackendReady, "post_init")?;
        self.stage = InitStage::Ready;
        Ok(())
    }

    fn expect_stage(&self, want: InitStage, op: &str) -> Result<()> {
        if self.stage != want {
            return Err(HarnessError::Precondition(format!(
                "{op} called in state {:?}",
                self.stage
            )));
        }
        Ok(())
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.stage != InitStage::Ready {
            return Err(HarnessError::Precondition(format!(
                "pipeline invoked before post_init (state {:?})",
                self.stage
            )));
        }
        Ok(())
    }

    pub fn data(&self) -> Result<&GeneratedData> {
        self.data
            .as_ref()
            .ok_or_else(|| HarnessError::Precondition("benchmark data not generated".into()))
    }

    fn bench_raw(&self) -> Result<u64> {
        self.handle
            .as_ref()
            .ok_or_else(|| HarnessError::Precondition("benchmark handle missing".into()))?
            .raw()
    }

    /// Tear the backend handle down eagerly (idempotent; also runs on
    /// drop).
    pub fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.destroy() {
                log::warn!("benchmark teardown: {e}");
            }
        }
    }

    // ── Pipeline ───────────────────────────────────────────────────────

    /// One full pipeline pass over the generated input batch: encode →
    /// encrypt (masked positions only) → load → operate → store → decrypt
    /// (cipher results only) → decode. Emits one timing event per executed
    /// step when a sink is given; warmup passes run without one. Returns
    /// the decoded result packs plus the summed step wall time, which is
    /// what the latency termination rule accumulates.
    pub fn run_pipeline_unit(
        &self,
        mut sink: Option<&mut dyn ReportSink>,
        operate_iterations: u64,
        cancel: &CancelFlag,
    ) -> Result<PipelineRun> {
        let mut step_wall_ns = 0u64;
        self.ensure_ready()?;
        let bench = self.bench_raw()?;
        let data = self.data()?;
        let offset = self.descriptor.category.event_id_offset();
        let mask = self
            .descriptor
            .effective_mask(self.workload.op_param_count());

        let cipher_packs: Vec<&DataPack> = data
            .inputs
            .iter()
            .filter(|p| mask & (1 << p.param_position()) != 0)
            .collect();
        let plain_packs: Vec<&DataPack> = data
            .inputs
            .iter()
            .filter(|p| mask & (1 << p.param_position()) == 0)
            .collect();

        // encode: one event covering both groups.
        let (cipher_encoded, plain_encoded) =
            self.timed(&mut sink, &mut step_wall_ns, offset, Step::Encode, 1, cancel, || {
                let c = if cipher_packs.is_empty() {
                    None
                } else {
                    Some(self.wrap(self.backend.encode(bench, &cipher_packs)?))
                };
                let p = if plain_packs.is_empty() {
                    None
                } else {
                    Some(self.wrap(self.backend.encode(bench, &plain_packs)?))
                };
                Ok((c, p))
            })?;

        // encrypt: only positions whose mask bit is set.
        let encrypted = match &cipher_encoded {
            Some(encoded) => {
                let raw = encoded.raw()?;
                Some(self.timed(&mut sink, &mut step_wall_ns, offset, Step::Encrypt, 1, cancel, || {
                    Ok(self.wrap(self.backend.encrypt(bench, raw)?))
                })?)
            }
            None => None,
        };

        let mut to_load = Vec::new();
        if let Some(h) = &encrypted {
            to_load.push(h.raw()?);
        }
        if let Some(h) = &plain_encoded {
            to_load.push(h.raw()?);
        }
        let loaded = self.timed(&mut sink, &mut step_wall_ns, offset, Step::Load, 1, cancel, || {
            Ok(self.wrap(self.backend.load(bench, &to_load)?))
        })?;
        // Host-side handles are consumed by load.
        drop(encrypted);
        drop(cipher_encoded);
        drop(plain_encoded);

        let remote = {
            let raw = loaded.raw()?;
            self.timed(
                &mut sink,
                &mut step_wall_ns,
                offset,
                Step::Operate,
                operate_iterations,
                cancel,
                || Ok(self.wrap(self.backend.operate(bench, raw)?)),
            )?
        };
        drop(loaded);

        let stored = {
            let raw = remote.raw()?;
            self.timed(&mut sink, &mut step_wall_ns, offset, Step::Store, 1, cancel, || {
                Ok(self.wrap(self.backend.store(bench, raw)?))
            })?
        };
        drop(remote);

        // Results are ciphertext iff any op parameter was.
        let result_plain = if mask != 0 {
            let raw = stored.raw()?;
            let h = self.timed(&mut sink, &mut step_wall_ns, offset, Step::Decrypt, 1, cancel, || {
                Ok(self.wrap(self.backend.decrypt(bench, raw)?))
            })?;
            drop(stored);
            h
        } else {
            stored
        };

        let mut actual: Vec<DataPack> = data
            .expected
            .iter()
            .map(|p| p.allocate_like())
            .collect::<Result<_>>()?;
        let raw = result_plain.raw()?;
        self.timed(&mut sink, &mut step_wall_ns, offset, Step::Decode, 1, cancel, || {
            self.backend.decode_into(bench, raw, &mut actual)
        })?;
        drop(result_plain);

        Ok(PipelineRun {
            actual,
            step_wall_ns,
        })
    }

    fn wrap(&self, raw: u64) -> BackendHandle {
        BackendHandle::new(raw, self.backend.clone())
    }

    /// Run one step under the wall and CPU timers. The timing event is
    /// emitted whether the step succeeds or fails, so an aborted run still
    /// reports the step it died in.
    #[allow(clippy::too_many_arguments)]
    fn timed<T>(
        &self,
        sink: &mut Option<&mut dyn ReportSink>,
        step_wall_ns: &mut u64,
        offset: u64,
        step: Step,
        iterations: u64,
        cancel: &CancelFlag,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        cancel.check()?;
        let wall = Instant::now();
        let cpu = ProcessTime::now();
        let out = f();
        let wall_ns = wall.elapsed().as_nanos() as u64;
        *step_wall_ns += wall_ns;
        if let Some(sink) = sink.as_deref_mut() {
            sink.add_event(
                TimingEvent {
                    event_id: offset + step as u64,
                    wall_ns,
                    cpu_ns: cpu.elapsed().as_nanos() as u64,
                    iterations,
                },
                step.label(),
            );
        }
        out
    }
}

impl Drop for PartialBenchmark {
    fn drop(&mut self) {
        self.teardown();
    }
}
