// workload.rs — Workload catalog, descriptors, and category parameters
//
// Declares the harness's fixed vocabulary: the workload variants it can
// benchmark, the scalar data types it generates, the two benchmark
// categories, and the typed view of a backend's self-description. The
// byte-level category-parameter codec lives here so the ABI layer and the
// in-process test backends agree on one layout.

use std::fmt;

/// Upper bound on op parameters a descriptor may declare. The cipher
/// parameter mask is 32 bits wide and indexes into this range.
pub const MAX_OP_PARAMS: usize = 32;

/// Size in bytes of the raw category-parameter block carried by every
/// descriptor (large enough for `offline.data_count[MAX_OP_PARAMS]`).
pub const CAT_PARAMS_BYTES: usize = MAX_OP_PARAMS * 8;

// ── Workloads ──────────────────────────────────────────────────────────────

/// The workload variants the harness knows how to generate data for and
/// validate. ABI codes are stable wire values; a backend advertising any
/// other code is skipped as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    EltwiseAdd,
    EltwiseMult,
    DotProduct,
    MatrixMultiply,
    LogReg,
    LogRegPolyD3,
    LogRegPolyD5,
    LogRegPolyD7,
}

/// All workloads in declaration order (used to register matchers).
pub const ALL_WORKLOADS: [Workload; 8] = [
    Workload::EltwiseAdd,
    Workload::EltwiseMult,
    Workload::DotProduct,
    Workload::MatrixMultiply,
    Workload::LogReg,
    Workload::LogRegPolyD3,
    Workload::LogRegPolyD5,
    Workload::LogRegPolyD7,
];

impl Workload {
    /// Stable ABI code for the workload.
    pub fn code(self) -> u32 {
        match self {
            Workload::EltwiseAdd => 0x11,
            Workload::EltwiseMult => 0x12,
            Workload::DotProduct => 0x13,
            Workload::MatrixMultiply => 0x14,
            Workload::LogReg => 0x21,
            Workload::LogRegPolyD3 => 0x22,
            Workload::LogRegPolyD5 => 0x23,
            Workload::LogRegPolyD7 => 0x24,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        ALL_WORKLOADS.iter().copied().find(|w| w.code() == code)
    }

    /// Human-readable name; becomes the leading canonical-path segment.
    pub fn name(self) -> &'static str {
        match self {
            Workload::EltwiseAdd => "EltwiseAdd",
            Workload::EltwiseMult => "EltwiseMult",
            Workload::DotProduct => "DotProduct",
            Workload::MatrixMultiply => "MatMul",
            Workload::LogReg => "LogReg",
            Workload::LogRegPolyD3 => "LogRegPolyD3",
            Workload::LogRegPolyD5 => "LogRegPolyD5",
            Workload::LogRegPolyD7 => "LogRegPolyD7",
        }
    }

    /// Number of workload parameters the harness expects for this workload
    /// (all tagged `u64`): vector length, matrix dimensions, or feature
    /// count.
    pub fn workload_param_count(self) -> usize {
        match self {
            Workload::MatrixMultiply => 3,
            _ => 1,
        }
    }

    /// Number of op parameters (input positions) the workload consumes.
    pub fn op_param_count(self) -> usize {
        match self {
            Workload::EltwiseAdd | Workload::EltwiseMult | Workload::DotProduct => 2,
            Workload::MatrixMultiply => 2,
            Workload::LogReg
            | Workload::LogRegPolyD3
            | Workload::LogRegPolyD5
            | Workload::LogRegPolyD7 => 3,
        }
    }

    /// Number of result positions. Every cataloged workload produces one.
    pub fn result_count(self) -> usize {
        1
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Data types ─────────────────────────────────────────────────────────────

/// Scalar element types a benchmark can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    pub fn code(self) -> u32 {
        match self {
            DataType::Int32 => 0,
            DataType::Int64 => 1,
            DataType::Float32 => 2,
            DataType::Float64 => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(DataType::Int32),
            1 => Some(DataType::Int64),
            2 => Some(DataType::Float32),
            3 => Some(DataType::Float64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }

    /// Element width in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Categories ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Latency,
    Offline,
}

impl Category {
    pub fn code(self) -> u32 {
        match self {
            Category::Latency => 1,
            Category::Offline => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Category::Latency),
            2 => Some(Category::Offline),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Latency => "Latency",
            Category::Offline => "Offline",
        }
    }

    /// Fixed event-id offset per category; drivers allocate ids above it.
    pub fn event_id_offset(self) -> u64 {
        match self {
            Category::Latency => 1000,
            Category::Offline => 2000,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Workload parameters ────────────────────────────────────────────────────

/// A tagged scalar configuring one workload instance (e.g. vector length,
/// matrix dimension).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkloadParam {
    UInt64(u64),
    Int64(i64),
    Float64(f64),
}

impl WorkloadParam {
    /// ABI tag value.
    pub fn tag(self) -> u32 {
        match self {
            WorkloadParam::UInt64(_) => 0,
            WorkloadParam::Int64(_) => 1,
            WorkloadParam::Float64(_) => 2,
        }
    }

    /// The value as `u64` if the tag is `UInt64`.
    pub fn as_u64(self) -> Option<u64> {
        match self {
            WorkloadParam::UInt64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadParam::UInt64(v) => write!(f, "{v}"),
            WorkloadParam::Int64(v) => write!(f, "{v}"),
            WorkloadParam::Float64(v) => write!(f, "{v}"),
        }
    }
}

// ── Category parameters ────────────────────────────────────────────────────

/// Typed view of the category-parameter union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryParams {
    Latency {
        warmup_iterations: u64,
        min_test_time_ms: u64,
    },
    Offline {
        data_count: [u64; MAX_OP_PARAMS],
    },
}

impl CategoryParams {
    /// Decode the typed view from a raw block, interpreting it per
    /// category. Unrecognized trailing bytes are preserved by the caller
    /// (the descriptor keeps the raw block verbatim for path derivation).
    pub fn decode(category: Category, raw: &[u8; CAT_PARAMS_BYTES]) -> Self {
        let word = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[i * 8..i * 8 + 8]);
            u64::from_le_bytes(b)
        };
        match category {
            Category::Latency => CategoryParams::Latency {
                warmup_iterations: word(0),
                min_test_time_ms: word(1),
            },
            Category::Offline => {
                let mut data_count = [0u64; MAX_OP_PARAMS];
                for (i, slot) in data_count.iter_mut().enumerate() {
                    *slot = word(i);
                }
                CategoryParams::Offline { data_count }
            }
        }
    }

    /// Encode the typed view back into a raw block (used by in-process
    /// backends; the inverse of `decode` for the populated prefix).
    pub fn encode(&self) -> [u8; CAT_PARAMS_BYTES] {
        let mut raw = [0u8; CAT_PARAMS_BYTES];
        match self {
            CategoryParams::Latency {
                warmup_iterations,
                min_test_time_ms,
            } => {
                raw[0..8].copy_from_slice(&warmup_iterations.to_le_bytes());
                raw[8..16].copy_from_slice(&min_test_time_ms.to_le_bytes());
            }
            CategoryParams::Offline { data_count } => {
                for (i, v) in data_count.iter().enumerate() {
                    raw[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
                }
            }
        }
        raw
    }
}

// ── Benchmark descriptor ───────────────────────────────────────────────────

/// Typed form of a backend's self-description of one benchmark variant.
/// `workload` stays a raw code: interpreting it is the matcher's job.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkDescriptor {
    pub workload: u32,
    pub category: Category,
    pub data_type: DataType,
    pub cipher_param_mask: u32,
    pub scheme: i32,
    pub security: i32,
    pub other: i64,
    pub cat_params: CategoryParams,
    /// The category-parameter block exactly as the backend supplied it,
    /// including reserved bytes. Feeds the canonical-path digest verbatim.
    pub cat_params_raw: [u8; CAT_PARAMS_BYTES],
}

impl BenchmarkDescriptor {
    /// Effective cipher mask: bits at or above the workload's op-parameter
    /// count are ignored.
    pub fn effective_mask(&self, op_param_count: usize) -> u32 {
        if op_param_count >= 32 {
            self.cipher_param_mask
        } else {
            self.cipher_param_mask & ((1u32 << op_param_count) - 1)
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
