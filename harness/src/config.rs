// config.rs — Harness configuration
//
// The YAML file is read by the CLI collaborator and handed to the core as
// a struct; CLI flags override file values. A `random_seed` of 0 means
// "derive from the clock at engine start".

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const DEFAULT_SAMPLE_SIZE: u64 = 100;
pub const DEFAULT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Samples per op parameter when the descriptor declares none.
    #[serde(default = "default_sample_size")]
    pub default_sample_size: u64,

    /// Seed for the global generator; 0 = current time.
    #[serde(default)]
    pub random_seed: u64,

    /// Floor for latency measurement windows; 0 = use the descriptor's.
    #[serde(default)]
    pub min_test_time_ms: u64,

    /// Relative tolerance for f32 validation.
    #[serde(default = "default_tolerance")]
    pub tolerance_f32: f64,

    /// Relative tolerance for f64 validation.
    #[serde(default = "default_tolerance")]
    pub tolerance_f64: f64,

    /// Path to the backend shared library.
    #[serde(default)]
    pub backend_lib_path: String,
}

fn default_sample_size() -> u64 {
    DEFAULT_SAMPLE_SIZE
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_sample_size: DEFAULT_SAMPLE_SIZE,
            random_seed: 0,
            min_test_time_ms: 0,
            tolerance_f32: DEFAULT_TOLERANCE,
            tolerance_f64: DEFAULT_TOLERANCE,
            backend_lib_path: String::new(),
        }
    }
}

impl Config {
    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        let config: Config = serde_yaml::from_str(&text)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value domains. Backend path presence is checked separately
    /// after CLI merging.
    pub fn validate(&self) -> Result<()> {
        if self.default_sample_size == 0 {
            return Err(HarnessError::Config(
                "default_sample_size must be positive".into(),
            ));
        }
        if !(self.tolerance_f32 >= 0.0) || !(self.tolerance_f64 >= 0.0) {
            return Err(HarnessError::Config(
                "tolerances must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// The YAML text emitted by `--dump`.
    pub fn default_yaml() -> String {
        // serde_yaml cannot fail on this plain struct.
        serde_yaml::to_string(&Config::default()).unwrap()
    }

    /// The seed to use for this run: the configured one, or the clock.
    pub fn effective_seed(&self) -> u64 {
        if self.random_seed != 0 {
            self.random_seed
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(1)
        }
    }

    /// Latency floor: the larger of the descriptor's and the config's.
    pub fn effective_min_test_time_ms(&self, descriptor_ms: u64) -> u64 {
        descriptor_ms.max(self.min_test_time_ms)
    }
}
