//! Variable comparison against reference data
//!
//! Compares locally computed tensors to the reference archive by name with an
//! absolute tolerance. Expected failure modes (archive missing, variable
//! missing, shape mismatch, tolerance exceeded) are carried in the returned
//! [`ComparisonResult`]; `Err` is reserved for tensor backend failures.

use anyhow::Result;
use candle_core::{DType, Tensor};
use std::borrow::Borrow;
use std::path::Path;
use thiserror::Error;
use tracing::error;

use super::archive::{ArchiveError, ReferenceArchive};
use super::npy_loader::dtype_name;
use super::report;
use crate::{DEFAULT_MISMATCH_SAMPLES, DEFAULT_TOLERANCE};

/// Comparison configuration
#[derive(Debug, Clone)]
pub struct ComparatorConfig {
    /// Absolute tolerance; a comparison passes when max |diff| < tolerance
    pub tolerance: f64,
    /// Maximum number of mismatching coordinates kept per result
    pub max_mismatch_samples: usize,
    /// Whether to log diagnostics for every comparison
    pub verbose: bool,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_mismatch_samples: DEFAULT_MISMATCH_SAMPLES,
            verbose: true,
        }
    }
}

/// Why a comparison failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The reference archive could not be loaded
    #[error("archive unavailable: {0}")]
    ArchiveUnavailable(String),
    /// The archive has no variable with this name
    #[error("variable not found")]
    VariableNotFound,
    /// Computed and reference shapes differ
    #[error("shape mismatch")]
    ShapeMismatch,
    /// Shapes match but max |diff| is not below the tolerance
    #[error("tolerance exceeded")]
    ToleranceExceeded,
}

/// One element that differs beyond tolerance
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Row-major coordinate
    pub index: Vec<usize>,
    /// Locally computed value
    pub actual: f64,
    /// Reference value
    pub expected: f64,
    /// Absolute difference
    pub diff: f64,
}

/// An array viewed as f64 values in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValues {
    /// Shape
    pub shape: Vec<usize>,
    /// Element type label before the cast
    pub dtype: String,
    /// Values cast to f64
    pub values: Vec<f64>,
}

impl ArrayValues {
    /// Cast a tensor, labelling it with its own dtype
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        Self::with_dtype(tensor, dtype_name(tensor.dtype()))
    }

    /// Cast a tensor, keeping a caller-supplied dtype label
    pub fn with_dtype(tensor: &Tensor, dtype: &str) -> Result<Self> {
        let values = tensor.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        Ok(Self {
            shape: tensor.dims().to_vec(),
            dtype: dtype.to_string(),
            values,
        })
    }
}

/// Result of comparing one variable
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    /// Variable name
    pub name: String,
    /// Whether the comparison passed
    pub passed: bool,
    /// Failure reason, `None` when passed
    pub failure: Option<FailureReason>,
    /// Tolerance the comparison used
    pub tolerance: f64,
    /// Shape of the computed array
    pub actual_shape: Vec<usize>,
    /// Element type of the computed array
    pub actual_dtype: String,
    /// Shape of the reference array, if it was found
    pub expected_shape: Option<Vec<usize>>,
    /// Element type of the reference array, if it was found
    pub expected_dtype: Option<String>,
    /// Maximum absolute difference, if values were compared
    pub max_abs_diff: Option<f64>,
    /// Mean absolute difference, if values were compared
    pub mean_abs_diff: Option<f64>,
    /// Number of elements whose difference exceeds the tolerance
    pub num_mismatches: usize,
    /// Total number of elements compared
    pub total_elements: usize,
    /// First few mismatching elements
    pub mismatches: Vec<Mismatch>,
}

impl ComparisonResult {
    /// Create a failing result that never reached the value comparison
    fn failed(
        name: &str,
        actual_shape: &[usize],
        actual_dtype: &str,
        tolerance: f64,
        reason: FailureReason,
    ) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            failure: Some(reason),
            tolerance,
            actual_shape: actual_shape.to_vec(),
            actual_dtype: actual_dtype.to_string(),
            expected_shape: None,
            expected_dtype: None,
            max_abs_diff: None,
            mean_abs_diff: None,
            num_mismatches: 0,
            total_elements: 0,
            mismatches: Vec::new(),
        }
    }

    /// Whether the shapes disagreed
    pub fn is_shape_mismatch(&self) -> bool {
        self.failure == Some(FailureReason::ShapeMismatch)
    }

    /// Summary string
    pub fn summary(&self) -> String {
        match (&self.failure, self.max_abs_diff, self.mean_abs_diff) {
            (None, Some(max), Some(mean)) => format!(
                "[PASS] {} - shape {:?}, max_diff={:.2e}, mean_diff={:.2e}",
                self.name, self.actual_shape, max, mean
            ),
            (Some(FailureReason::ShapeMismatch), _, _) => format!(
                "[FAIL] {} - shape mismatch: expected {:?}, got {:?}",
                self.name,
                self.expected_shape.as_deref().unwrap_or(&[]),
                self.actual_shape
            ),
            (Some(FailureReason::ToleranceExceeded), Some(max), _) => format!(
                "[FAIL] {} - max_diff={:.2e} >= tol={:.2e}, {} of {} elements differ",
                self.name, max, self.tolerance, self.num_mismatches, self.total_elements
            ),
            (Some(reason), _, _) => format!("[FAIL] {} - {}", self.name, reason),
            (None, _, _) => format!("[PASS] {}", self.name),
        }
    }
}

/// Compare two arrays with an absolute tolerance
///
/// Shapes must be identical; otherwise no values are compared. A NaN
/// difference counts as a mismatch and makes the max difference NaN.
pub fn compare_arrays(
    name: &str,
    actual: &ArrayValues,
    expected: &ArrayValues,
    tolerance: f64,
    max_samples: usize,
) -> ComparisonResult {
    let mut result = ComparisonResult::failed(
        name,
        &actual.shape,
        &actual.dtype,
        tolerance,
        FailureReason::ShapeMismatch,
    );
    result.expected_shape = Some(expected.shape.clone());
    result.expected_dtype = Some(expected.dtype.clone());

    if actual.shape != expected.shape {
        return result;
    }

    let mut max_diff = 0.0f64;
    let mut sum_diff = 0.0f64;
    let mut saw_nan = false;
    let mut num_mismatches = 0;
    let mut mismatches = Vec::new();

    for (i, (&a, &e)) in actual.values.iter().zip(&expected.values).enumerate() {
        let diff = (a - e).abs();
        if diff.is_nan() {
            saw_nan = true;
        } else {
            max_diff = max_diff.max(diff);
        }
        sum_diff += diff;

        if diff.is_nan() || diff > tolerance {
            num_mismatches += 1;
            if mismatches.len() < max_samples {
                mismatches.push(Mismatch {
                    index: unravel_index(i, &actual.shape),
                    actual: a,
                    expected: e,
                    diff,
                });
            }
        }
    }

    let total = actual.values.len();
    let max_diff = if saw_nan { f64::NAN } else { max_diff };
    let mean_diff = if total == 0 { 0.0 } else { sum_diff / total as f64 };
    let passed = max_diff < tolerance;

    result.passed = passed;
    result.failure = (!passed).then_some(FailureReason::ToleranceExceeded);
    result.max_abs_diff = Some(max_diff);
    result.mean_abs_diff = Some(mean_diff);
    result.num_mismatches = num_mismatches;
    result.total_elements = total;
    result.mismatches = mismatches;
    result
}

/// Convert a flat row-major offset into a coordinate
fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        let dim = shape[axis].max(1);
        index[axis] = flat % dim;
        flat /= dim;
    }
    index
}

/// Results of comparing several variables, in input order
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Per-variable results
    pub results: Vec<ComparisonResult>,
}

impl BatchResult {
    /// Number of passing variables
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Number of variables compared
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// passed / total, `None` when nothing was compared
    pub fn pass_rate(&self) -> Option<f64> {
        if self.results.is_empty() {
            None
        } else {
            Some(self.passed() as f64 / self.total() as f64)
        }
    }

    /// Check if all comparisons passed
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Look up the result for a variable
    pub fn get(&self, name: &str) -> Option<&ComparisonResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Failing results
    pub fn failures(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Print summary
    pub fn print_summary(&self) {
        for line in report::batch_summary_lines(self) {
            println!("{}", line);
        }
    }
}

/// Compares computed tensors to a reference archive
pub struct Comparator {
    archive: std::result::Result<ReferenceArchive, ArchiveError>,
    config: ComparatorConfig,
}

impl Comparator {
    /// Load the archive at `path`; a failed load leaves the comparator usable
    /// but every comparison fails with [`FailureReason::ArchiveUnavailable`]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_config(path, ComparatorConfig::default())
    }

    /// Create with custom config
    pub fn with_config<P: AsRef<Path>>(path: P, config: ComparatorConfig) -> Self {
        let archive = ReferenceArchive::load(path);
        if let Err(ref e) = archive {
            error!("Reference archive unavailable: {}", e);
        }
        Self { archive, config }
    }

    /// Wrap an already loaded archive
    pub fn from_archive(archive: ReferenceArchive, config: ComparatorConfig) -> Self {
        Self {
            archive: Ok(archive),
            config,
        }
    }

    /// The archive, or why it could not be loaded
    pub fn archive(&self) -> std::result::Result<&ReferenceArchive, &ArchiveError> {
        self.archive.as_ref()
    }

    /// Whether the archive loaded
    pub fn is_available(&self) -> bool {
        self.archive.is_ok()
    }

    /// Comparison settings
    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    /// Compare one variable using the configured tolerance
    pub fn compare(&self, name: &str, actual: &Tensor) -> Result<ComparisonResult> {
        self.compare_with_tolerance(name, actual, self.config.tolerance)
    }

    /// Compare one variable with an explicit tolerance
    pub fn compare_with_tolerance(
        &self,
        name: &str,
        actual: &Tensor,
        tolerance: f64,
    ) -> Result<ComparisonResult> {
        let dtype = dtype_name(actual.dtype());

        let result = match &self.archive {
            Err(e) => ComparisonResult::failed(
                name,
                actual.dims(),
                dtype,
                tolerance,
                FailureReason::ArchiveUnavailable(e.to_string()),
            ),
            Ok(archive) => match archive.get(name) {
                None => ComparisonResult::failed(
                    name,
                    actual.dims(),
                    dtype,
                    tolerance,
                    FailureReason::VariableNotFound,
                ),
                Some(reference) if reference.shape() != actual.dims() => {
                    let mut result = ComparisonResult::failed(
                        name,
                        actual.dims(),
                        dtype,
                        tolerance,
                        FailureReason::ShapeMismatch,
                    );
                    result.expected_shape = Some(reference.shape().to_vec());
                    result.expected_dtype = Some(reference.dtype.clone());
                    result
                }
                Some(reference) => {
                    let expected = ArrayValues::with_dtype(&reference.tensor, &reference.dtype)?;
                    let actual = ArrayValues::from_tensor(actual)?;
                    compare_arrays(
                        name,
                        &actual,
                        &expected,
                        tolerance,
                        self.config.max_mismatch_samples,
                    )
                }
            },
        };

        if self.config.verbose {
            report::log_comparison(&result);
        }
        Ok(result)
    }

    /// Compare several variables using the configured tolerance
    pub fn compare_all<I, K, V>(&self, arrays: I) -> Result<BatchResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Borrow<Tensor>,
    {
        self.compare_all_with_tolerance(arrays, self.config.tolerance)
    }

    /// Compare several variables with an explicit tolerance
    pub fn compare_all_with_tolerance<I, K, V>(&self, arrays: I, tolerance: f64) -> Result<BatchResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Borrow<Tensor>,
    {
        let results = arrays
            .into_iter()
            .map(|(name, tensor)| self.compare_with_tolerance(name.as_ref(), tensor.borrow(), tolerance))
            .collect::<Result<Vec<_>>>()?;

        let batch = BatchResult { results };
        if self.config.verbose {
            report::log_batch_summary(&batch);
        }
        Ok(batch)
    }
}

/// Load `archive_path` and compare a single variable
pub fn quick_compare<P: AsRef<Path>>(name: &str, actual: &Tensor, archive_path: P) -> Result<ComparisonResult> {
    Comparator::new(archive_path).compare(name, actual)
}
