// datagen.rs — Reference data generation and cleartext ground truth
//
// Each workload defines a generator that fills the input packs with draws
// from a truncated normal and computes the expected output for every
// coordinate of the sample space exactly once, before the backend runs.
// All randomness flows through one process-wide generator, seeded at
// engine start and re-armed with a path-bound sub-seed before each
// benchmark's generation, so a (workload, params, seed, data type) tuple
// reproduces bitwise-identical data even when only a subset of the run's
// benchmarks is executed.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{HarnessError, Result};
use crate::pack::{DataPack, NativeType, SampleSpace};
use crate::workload::{DataType, Workload, WorkloadParam};

// ── Global generator ───────────────────────────────────────────────────────

static GLOBAL_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::seed_from_u64(0)));

/// (Re)seed the process-wide generator. Called once at engine start.
pub fn seed_global(seed: u64) {
    *GLOBAL_RNG.lock().unwrap() = StdRng::seed_from_u64(seed);
}

fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    f(&mut GLOBAL_RNG.lock().unwrap())
}

/// Deterministic per-benchmark seed: the run seed bound to a label
/// (the benchmark's canonical path). Generating a benchmark's data from
/// this value makes its bytes independent of which other benchmarks ran
/// before it.
pub fn derive_seed(run_seed: u64, label: &str) -> u64 {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(run_seed.to_le_bytes());
    hasher.update(label.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// One draw from a normal truncated to mean ± 2·stddev. Resamples, with a
/// clamp fallback so the loop is bounded.
fn truncated_normal(rng: &mut impl Rng, mean: f64, stddev: f64) -> f64 {
    let dist = Normal::new(mean, stddev).expect("stddev is finite and positive");
    let lo = mean - 2.0 * stddev;
    let hi = mean + 2.0 * stddev;
    for _ in 0..64 {
        let v = dist.sample(rng);
        if v >= lo && v <= hi {
            return v;
        }
    }
    dist.sample(rng).clamp(lo, hi)
}

// ── Element arithmetic ─────────────────────────────────────────────────────

/// Arithmetic in the declared data type. Integer types wrap on overflow.
pub trait Element: NativeType {
    fn zero() -> Self;
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
    fn add(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
}

impl Element for i32 {
    fn zero() -> Self {
        0
    }
    fn from_f64(v: f64) -> Self {
        v.round() as i32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}

impl Element for i64 {
    fn zero() -> Self {
        0
    }
    fn from_f64(v: f64) -> Self {
        v.round() as i64
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}

impl Element for f32 {
    fn zero() -> Self {
        0.0
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

impl Element for f64 {
    fn zero() -> Self {
        0.0
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

// ── Ground-truth kernels ───────────────────────────────────────────────────

pub fn eltwise_add<T: Element>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().zip(b).map(|(&x, &y)| x.add(y)).collect()
}

pub fn eltwise_mult<T: Element>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().zip(b).map(|(&x, &y)| x.mul(y)).collect()
}

/// Inner product accumulated left-to-right in `T`.
pub fn dot_product<T: Element>(a: &[T], b: &[T]) -> T {
    a.iter()
        .zip(b)
        .fold(T::zero(), |acc, (&x, &y)| acc.add(x.mul(y)))
}

/// Naive row-major triple loop; accumulates left-to-right in `T`.
pub fn mat_mul<T: Element>(a: &[T], b: &[T], m: usize, k: usize, n: usize) -> Vec<T> {
    let mut out = vec![T::zero(); m * n];
    for row in 0..m {
        for col in 0..n {
            let mut acc = T::zero();
            for inner in 0..k {
                acc = acc.add(a[row * k + inner].mul(b[inner * n + col]));
            }
            out[row * n + col] = acc;
        }
    }
    out
}

/// Sigmoid form used by a logistic-regression workload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigmoidKind {
    Exact,
    PolyD3,
    PolyD5,
    PolyD7,
}

/// Polynomial approximation coefficients in ascending powers.
pub const SIGMOID_PD3: [f64; 4] = [0.5, 0.15012, 0.0, -0.0015930078125];
pub const SIGMOID_PD5: [f64; 6] = [
    0.5,
    0.19131,
    0.0,
    -0.0045963,
    0.0,
    0.0000412332000732421875,
];
pub const SIGMOID_PD7: [f64; 8] = [
    0.5,
    0.21687,
    0.0,
    -0.00819154296875,
    0.0,
    0.0001658331298828125,
    0.0,
    -0.00000119561672210693359375,
];

/// Horner evaluation of a polynomial given in ascending powers.
pub fn horner(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

pub fn sigmoid(kind: SigmoidKind, x: f64) -> f64 {
    match kind {
        SigmoidKind::Exact => 1.0 / (1.0 + (-x).exp()),
        SigmoidKind::PolyD3 => horner(&SIGMOID_PD3, x),
        SigmoidKind::PolyD5 => horner(&SIGMOID_PD5, x),
        SigmoidKind::PolyD7 => horner(&SIGMOID_PD7, x),
    }
}

/// Logistic-regression inference. Computed in f64 regardless of `T`, then
/// cast to the declared type.
pub fn logistic_regression<T: Element>(kind: SigmoidKind, w: &[T], b: T, x: &[T]) -> T {
    let mut acc = b.to_f64();
    for (&wi, &xi) in w.iter().zip(x) {
        acc += wi.to_f64() * xi.to_f64();
    }
    T::from_f64(sigmoid(kind, acc))
}

fn sigmoid_for(workload: Workload) -> Option<SigmoidKind> {
    match workload {
        Workload::LogReg => Some(SigmoidKind::Exact),
        Workload::LogRegPolyD3 => Some(SigmoidKind::PolyD3),
        Workload::LogRegPolyD5 => Some(SigmoidKind::PolyD5),
        Workload::LogRegPolyD7 => Some(SigmoidKind::PolyD7),
        _ => None,
    }
}

// ── Workload shapes ────────────────────────────────────────────────────────

/// Element counts per input buffer and per result buffer for a workload
/// with validated parameters.
fn buffer_shape(workload: Workload, w_params: &[WorkloadParam]) -> Result<(Vec<usize>, usize)> {
    let dim = |i: usize| -> Result<usize> {
        w_params
            .get(i)
            .and_then(|p| p.as_u64())
            .filter(|&v| v > 0)
            .map(|v| v as usize)
            .ok_or_else(|| {
                HarnessError::DescriptorMismatch(format!(
                    "{workload}: workload parameter {i} must be a positive u64"
                ))
            })
    };
    match workload {
        Workload::EltwiseAdd | Workload::EltwiseMult => {
            let n = dim(0)?;
            Ok((vec![n, n], n))
        }
        Workload::DotProduct => {
            let n = dim(0)?;
            Ok((vec![n, n], 1))
        }
        Workload::MatrixMultiply => {
            let (m, k, n) = (dim(0)?, dim(1)?, dim(2)?);
            Ok((vec![m * k, k * n], m * n))
        }
        Workload::LogReg
        | Workload::LogRegPolyD3
        | Workload::LogRegPolyD5
        | Workload::LogRegPolyD7 => {
            let n = dim(0)?;
            // w, b, x
            Ok((vec![n, 1, n], 1))
        }
    }
}

/// Sampling distribution per workload: the logistic-regression family
/// draws from N(0, 1); everything else from N(0, 10).
fn value_distribution(workload: Workload) -> (f64, f64) {
    match workload {
        Workload::LogReg
        | Workload::LogRegPolyD3
        | Workload::LogRegPolyD5
        | Workload::LogRegPolyD7 => (0.0, 1.0),
        _ => (0.0, 10.0),
    }
}

// ── Generation ─────────────────────────────────────────────────────────────

/// Inputs plus immutable expected outputs for one benchmark instance. The
/// generator exclusively owns all buffers; backends get read-only views.
#[derive(Debug, Clone)]
pub struct GeneratedData {
    pub space: SampleSpace,
    pub inputs: Vec<DataPack>,
    pub expected: Vec<DataPack>,
}

/// Generate inputs and ground truth for a workload instance.
/// `batch_sizes[i]` is the sample count for input parameter `i`.
pub fn generate(
    workload: Workload,
    w_params: &[WorkloadParam],
    data_type: DataType,
    batch_sizes: &[u64],
) -> Result<GeneratedData> {
    match data_type {
        DataType::Int32 => generate_typed::<i32>(workload, w_params, data_type, batch_sizes),
        DataType::Int64 => generate_typed::<i64>(workload, w_params, data_type, batch_sizes),
        DataType::Float32 => generate_typed::<f32>(workload, w_params, data_type, batch_sizes),
        DataType::Float64 => generate_typed::<f64>(workload, w_params, data_type, batch_sizes),
    }
}

fn generate_typed<T: Element>(
    workload: Workload,
    w_params: &[WorkloadParam],
    data_type: DataType,
    batch_sizes: &[u64],
) -> Result<GeneratedData> {
    let (input_elems, result_elems) = buffer_shape(workload, w_params)?;
    if batch_sizes.len() != input_elems.len() {
        return Err(HarnessError::DescriptorMismatch(format!(
            "{workload} takes {} op parameters, got {} batch sizes",
            input_elems.len(),
            batch_sizes.len()
        )));
    }
    let space = SampleSpace::new(batch_sizes.to_vec())?;
    let (mean, stddev) = value_distribution(workload);

    // Inputs: parameter-major, sample-minor fill order keeps the stream
    // reproducible for a given seed.
    let mut inputs = Vec::with_capacity(input_elems.len());
    for (pos, &elems) in input_elems.iter().enumerate() {
        let sizes = vec![elems * data_type.size(); batch_sizes[pos] as usize];
        let mut pack = DataPack::allocate(pos as u64, data_type, &sizes)?;
        for sample in 0..pack.buffer_count() {
            let values = pack.typed_mut::<T>(sample)?;
            with_rng(|rng| {
                for v in values.iter_mut() {
                    *v = T::from_f64(truncated_normal(rng, mean, stddev));
                }
            });
        }
        inputs.push(pack);
    }

    // Expected outputs: one buffer per coordinate of the sample space,
    // computed exactly once.
    let cardinality = space.cardinality() as usize;
    let result_sizes = vec![result_elems * data_type.size(); cardinality];
    let mut expected = DataPack::allocate(
        input_elems.len() as u64,
        data_type,
        &result_sizes,
    )?;
    for flat in 0..cardinality {
        let multi = space.multi_index(flat as u64);
        let operand =
            |pos: usize| -> Result<&[T]> { inputs[pos].typed::<T>(multi[pos] as usize) };
        let result: Vec<T> = match workload {
            Workload::EltwiseAdd => eltwise_add(operand(0)?, operand(1)?),
            Workload::EltwiseMult => eltwise_mult(operand(0)?, operand(1)?),
            Workload::DotProduct => vec![dot_product(operand(0)?, operand(1)?)],
            Workload::MatrixMultiply => {
                let m = w_params[0].as_u64().unwrap_or(0) as usize;
                let k = w_params[1].as_u64().unwrap_or(0) as usize;
                let n = w_params[2].as_u64().unwrap_or(0) as usize;
                mat_mul(operand(0)?, operand(1)?, m, k, n)
            }
            Workload::LogReg
            | Workload::LogRegPolyD3
            | Workload::LogRegPolyD5
            | Workload::LogRegPolyD7 => {
                let kind = sigmoid_for(workload).expect("logreg family");
                let w = operand(0)?;
                let b = operand(1)?[0];
                let x = operand(2)?;
                vec![logistic_regression(kind, w, b, x)]
            }
        };
        expected.typed_mut::<T>(flat)?.copy_from_slice(&result);
    }

    Ok(GeneratedData {
        space,
        inputs,
        expected: vec![expected],
    })
}

// ── Test support ───────────────────────────────────────────────────────────


// ── Tests ──────────────────────────────────────────────────────────────────
