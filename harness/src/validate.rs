// validate.rs — Numerical validation of decoded results
//
// Integer types compare exactly. Floating types accept
// |a − e| ≤ tol · max(|e|, ε) with a type-dependent absolute floor ε, so
// expected values near zero do not demand impossible relative precision.
// The first mismatch is fatal for the benchmark run; the engine records it
// and moves on.

use crate::config::Config;
use crate::datagen::GeneratedData;
use crate::error::{HarnessError, Result};
use crate::pack::DataPack;
use crate::workload::DataType;

/// Absolute floors for the relative comparison.
pub const FLOOR_F32: f64 = 1e-7;
pub const FLOOR_F64: f64 = 1e-10;

/// Accept a floating pair under relative tolerance with an absolute floor.
pub fn float_close(actual: f64, expected: f64, tol: f64, floor: f64) -> bool {
    (actual - expected).abs() <= tol * expected.abs().max(floor)
}

fn first_int_mismatch<T: PartialEq + std::fmt::Display + Copy>(
    expected: &[T],
    actual: &[T],
) -> Option<(usize, String, String)> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|i| (i, expected[i].to_string(), actual[i].to_string()))
}

fn first_float_mismatch<T: Copy + Into<f64> + std::fmt::Display>(
    expected: &[T],
    actual: &[T],
    tol: f64,
    floor: f64,
) -> Option<(usize, String, String)> {
    expected
        .iter()
        .zip(actual)
        .position(|(&e, &a)| !float_close(a.into(), e.into(), tol, floor))
        .map(|i| (i, expected[i].to_string(), actual[i].to_string()))
}

/// Compare one expected/actual buffer pair; `None` means acceptance.
fn compare_buffers(
    expected: &DataPack,
    actual: &DataPack,
    index: usize,
    config: &Config,
) -> Result<Option<(usize, String, String)>> {
    Ok(match expected.data_type() {
        DataType::Int32 => {
            first_int_mismatch(expected.typed::<i32>(index)?, actual.typed::<i32>(index)?)
        }
        DataType::Int64 => {
            first_int_mismatch(expected.typed::<i64>(index)?, actual.typed::<i64>(index)?)
        }
        DataType::Float32 => first_float_mismatch(
            expected.typed::<f32>(index)?,
            actual.typed::<f32>(index)?,
            config.tolerance_f32,
            FLOOR_F32,
        ),
        DataType::Float64 => first_float_mismatch(
            expected.typed::<f64>(index)?,
            actual.typed::<f64>(index)?,
            config.tolerance_f64,
            FLOOR_F64,
        ),
    })
}

/// Validate every decoded result against the generator's ground truth.
/// Fails on the first mismatch with its flat index, multi-index, element
/// offset, and both values.
pub fn validate(data: &GeneratedData, actual: &[DataPack], config: &Config) -> Result<()> {
    if actual.len() != data.expected.len() {
        return Err(HarnessError::Precondition(format!(
            "backend decoded {} result packs, expected {}",
            actual.len(),
            data.expected.len()
        )));
    }
    for (expected_pack, actual_pack) in data.expected.iter().zip(actual) {
        if actual_pack.buffer_count() != expected_pack.buffer_count() {
            return Err(HarnessError::Precondition(format!(
                "result pack has {} buffers, expected {}",
                actual_pack.buffer_count(),
                expected_pack.buffer_count()
            )));
        }
        for flat in 0..expected_pack.buffer_count() {
            if let Some((offset, expected, actual)) =
                compare_buffers(expected_pack, actual_pack, flat, config)?
            {
                return Err(HarnessError::Validation {
                    flat_index: flat as u64,
                    multi_index: data.space.multi_index(flat as u64),
                    offset,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
