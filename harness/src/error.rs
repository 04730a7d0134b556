// error.rs — Unified error taxonomy
//
// Every fallible operation in the harness returns `Result<T>` with one of
// the kinds below. Recovery boundaries: Validation and Backend are caught
// at the engine loop (the run continues with the next benchmark); Config
// and Resource abort the run; Precondition indicates a harness bug;
// Cancelled unwinds to main, which exits with status 130.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Malformed configuration or missing backend library.
    #[error("config error: {0}")]
    Config(String),

    /// Nonzero ABI return code, wrapping the backend's last-error string.
    #[error("backend error (code {code}): {message}")]
    Backend { code: i32, message: String },

    /// Workload-parameter arity, tag, or domain mismatch for a descriptor.
    #[error("descriptor mismatch: {0}")]
    DescriptorMismatch(String),

    /// Pipeline call before `post_init`, or a token consumed by the wrong
    /// benchmark class.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Numerical mismatch beyond tolerance.
    #[error(
        "validation failed at result {flat_index} (multi-index {multi_index:?}), \
         element offset {offset}: expected {expected}, got {actual}"
    )]
    Validation {
        flat_index: u64,
        multi_index: Vec<u64>,
        offset: usize,
        expected: String,
        actual: String,
    },

    /// Allocation failure or an impossible buffer request.
    #[error("resource error: {0}")]
    Resource(String),

    /// SIGINT observed while a benchmark was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl HarnessError {
    /// Short kind name used in `[FAILED] <path>: <kind>: <message>` lines.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Config(_) => "ConfigError",
            HarnessError::Backend { .. } => "BackendError",
            HarnessError::DescriptorMismatch(_) => "DescriptorMismatch",
            HarnessError::Precondition(_) => "PreconditionFailed",
            HarnessError::Validation { .. } => "ValidationError",
            HarnessError::Resource(_) => "ResourceError",
            HarnessError::Cancelled => "Cancelled",
        }
    }

    /// True for kinds the engine absorbs per benchmark instead of aborting
    /// the whole run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HarnessError::Backend { .. }
                | HarnessError::Validation { .. }
                | HarnessError::DescriptorMismatch(_)
        )
    }
}
