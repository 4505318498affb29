//! Configuration loading
//!
//! Settings live in a YAML file; every field is optional and falls back to
//! the defaults below.
//!
//! ```yaml
//! archive: data/FADE_key_variables.safetensors
//! image: data/test_image2.npy
//! tolerance: 1.0e-10
//! max_mismatch_samples: 5
//! patch_size: 8
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::parity::ComparatorConfig;
use crate::{DEFAULT_MISMATCH_SAMPLES, DEFAULT_PATCH_SIZE, DEFAULT_TOLERANCE};

/// Default reference archive location
pub const DEFAULT_ARCHIVE_PATH: &str = "data/FADE_key_variables";

/// Default input image location
pub const DEFAULT_IMAGE_PATH: &str = "data/test_image2.npy";

/// Parity harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParityConfig {
    /// Reference archive (npy directory, .safetensors or .npy)
    pub archive: PathBuf,
    /// Input image as a (height, width, channels) .npy array
    pub image: PathBuf,
    /// Absolute comparison tolerance
    pub tolerance: f64,
    /// Mismatching coordinates reported per variable
    pub max_mismatch_samples: usize,
    /// FADE patch edge length
    pub patch_size: usize,
}

impl Default for ParityConfig {
    fn default() -> Self {
        Self {
            archive: PathBuf::from(DEFAULT_ARCHIVE_PATH),
            image: PathBuf::from(DEFAULT_IMAGE_PATH),
            tolerance: DEFAULT_TOLERANCE,
            max_mismatch_samples: DEFAULT_MISMATCH_SAMPLES,
            patch_size: DEFAULT_PATCH_SIZE,
        }
    }
}

impl ParityConfig {
    /// Load and validate a YAML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no comparison could use
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            anyhow::bail!("tolerance must be a finite non-negative number, got {}", self.tolerance);
        }
        if self.patch_size == 0 {
            anyhow::bail!("patch_size must be positive");
        }
        Ok(())
    }

    /// Comparator settings derived from this config
    pub fn comparator_config(&self, verbose: bool) -> ComparatorConfig {
        ComparatorConfig {
            tolerance: self.tolerance,
            max_mismatch_samples: self.max_mismatch_samples,
            verbose,
        }
    }
}
