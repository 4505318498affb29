//! # fade-parity
//!
//! Rust port of the FADE (Fog Aware Density Evaluator) no-reference fog
//! density metric, together with a numeric-parity harness that checks
//! intermediate arrays against a reference implementation's saved outputs.
//!
//! ## Features
//!
//! - Reference archives from npy directories or safetensors files
//! - Per-variable and batch comparison with an absolute tolerance
//! - FADE preprocessing (patch grid, RGB split, luma) routed through the harness
//!
//! The fog density estimation itself is not ported yet; the metric returns a
//! placeholder score.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fade_parity::{Comparator, Fade};
//!
//! let comparator = Comparator::new("data/FADE_key_variables");
//! let fade = Fade::default().with_comparator(comparator);
//! let score = fade.score(&image)?;
//! ```

// Require docs for public items, but not struct fields (too verbose)
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod metrics;
pub mod parity;
pub mod utils;

// Re-exports for convenience
pub use config::ParityConfig;
pub use metrics::{fade, Fade, FadeIntermediates};
pub use parity::{BatchResult, Comparator, ComparatorConfig, ComparisonResult, FailureReason, ReferenceArchive};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default absolute tolerance for comparisons
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// Default FADE patch edge length in pixels
pub const DEFAULT_PATCH_SIZE: usize = 8;

/// Default number of mismatching coordinates kept per comparison
pub const DEFAULT_MISMATCH_SAMPLES: usize = 5;
