//! Image quality metrics
//!
//! - FADE: fog density (preprocessing only, parity-checked)

pub mod fade;

pub use fade::{fade, luma, Fade, FadeIntermediates, FadeOutput, PatchGrid, PLACEHOLDER_SCORE};
