//! Human-readable diagnostics for comparison results

use tracing::{info, warn};

use super::archive::{VariableContents, VariableInfo};
use super::comparator::{BatchResult, ComparisonResult, FailureReason};

/// Detail lines for one comparison: shapes, dtypes, differences, verdict and
/// sample mismatches
pub fn comparison_lines(result: &ComparisonResult) -> Vec<String> {
    let mut lines = vec![format!("=== Comparing variable: {} ===", result.name)];

    match &result.failure {
        Some(FailureReason::ArchiveUnavailable(cause)) => {
            lines.push(format!("Reference archive not loaded ({})", cause));
            return lines;
        }
        Some(FailureReason::VariableNotFound) => {
            lines.push(format!("Variable '{}' is not in the reference archive", result.name));
            return lines;
        }
        _ => {}
    }

    lines.push(format!("Computed shape:  {:?}", result.actual_shape));
    if let Some(shape) = &result.expected_shape {
        lines.push(format!("Reference shape: {:?}", shape));
    }
    lines.push(format!("Computed dtype:  {}", result.actual_dtype));
    if let Some(dtype) = &result.expected_dtype {
        lines.push(format!("Reference dtype: {}", dtype));
    }

    if result.is_shape_mismatch() {
        lines.push("MISMATCH: shapes differ".to_string());
        return lines;
    }

    if let (Some(max), Some(mean)) = (result.max_abs_diff, result.mean_abs_diff) {
        lines.push(format!("Max abs diff:  {:e}", max));
        lines.push(format!("Mean abs diff: {:e}", mean));
    }

    if result.passed {
        lines.push("MATCH".to_string());
    } else {
        lines.push(format!("MISMATCH: tolerance {:e} exceeded", result.tolerance));
        if result.num_mismatches > 0 {
            lines.push(format!("Mismatching elements: {}", result.num_mismatches));
        }
        for m in &result.mismatches {
            lines.push(format!(
                "  at {:?}: computed={:.6}, reference={:.6}",
                m.index, m.actual, m.expected
            ));
        }
    }

    lines
}

/// Emit the diagnostics of one comparison through tracing
pub fn log_comparison(result: &ComparisonResult) {
    let lines = comparison_lines(result);
    match result.failure {
        None => lines.iter().for_each(|l| info!("{}", l)),
        Some(_) => lines.iter().for_each(|l| warn!("{}", l)),
    }
}

/// Per-variable status followed by the aggregate
pub fn batch_summary_lines(batch: &BatchResult) -> Vec<String> {
    let rule = "=".repeat(50);
    let mut lines = vec![String::new(), rule.clone(), "Comparison summary:".to_string()];

    for result in &batch.results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        lines.push(format!("  {}: {}", result.name, status));
    }

    lines.push(String::new());
    lines.push(format!("Total: {}/{} variables match", batch.passed(), batch.total()));
    lines.push(match batch.pass_rate() {
        Some(rate) => format!("Pass rate: {:.1}%", rate * 100.0),
        None => "Pass rate: n/a (nothing compared)".to_string(),
    });
    lines.push(rule);
    lines
}

/// Emit a batch summary through tracing
pub fn log_batch_summary(batch: &BatchResult) {
    let lines = batch_summary_lines(batch);
    if batch.all_passed() {
        lines.iter().for_each(|l| info!("{}", l));
    } else {
        lines.iter().for_each(|l| warn!("{}", l));
    }
}

/// Listing lines for one archive variable
pub fn variable_lines(info: &VariableInfo) -> Vec<String> {
    let mut lines = vec![format!("{}: shape={:?}, dtype={}", info.name, info.shape, info.dtype)];
    match &info.contents {
        VariableContents::Values(values) => lines.push(format!("  values: {:?}", values)),
        VariableContents::Range { min, max } => {
            lines.push(format!("  range: [{:.6}, {:.6}]", min, max))
        }
        VariableContents::Empty => lines.push("  (empty)".to_string()),
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parity::comparator::{compare_arrays, ArrayValues};

    fn values(values: Vec<f64>) -> ArrayValues {
        ArrayValues { shape: vec![values.len()], dtype: "float64".to_string(), values }
    }

    #[test]
    fn test_mismatch_lines_show_samples() {
        let result = compare_arrays("Ig", &values(vec![1.0, 2.5]), &values(vec![1.0, 2.0]), 1e-3, 5);
        let lines = comparison_lines(&result);
        assert!(lines[0].contains("Ig"));
        assert!(lines.iter().any(|l| l.contains("at [1]: computed=2.500000, reference=2.000000")));
    }

    #[test]
    fn test_shape_mismatch_lines_stop_early() {
        let result = compare_arrays("R", &values(vec![1.0]), &values(vec![1.0, 2.0]), 1e-3, 5);
        let lines = comparison_lines(&result);
        assert_eq!(lines.last().unwrap(), "MISMATCH: shapes differ");
        assert!(!lines.iter().any(|l| l.contains("Max abs diff")));
    }

    #[test]
    fn test_batch_summary_handles_empty_batch() {
        let lines = batch_summary_lines(&BatchResult::default());
        assert!(lines.iter().any(|l| l == "Total: 0/0 variables match"));
        assert!(lines.iter().any(|l| l.contains("n/a")));
    }

    #[test]
    fn test_variable_lines() {
        let info = VariableInfo {
            name: "ps".to_string(),
            shape: vec![1, 1],
            dtype: "int64".to_string(),
            contents: VariableContents::Values(vec![8.0]),
        };
        let lines = variable_lines(&info);
        assert_eq!(lines[0], "ps: shape=[1, 1], dtype=int64");
        assert_eq!(lines[1], "  values: [8.0]");
    }
}
