//! Integration tests for fade-parity
//!
//! Exercises the parity harness end to end: archives on disk, single and
//! batch comparisons, and the FADE preprocessing checked against itself.

use candle_core::{safetensors, DType, Device, Tensor};
use std::collections::HashMap;

use fade_parity::metrics::{Fade, FadeIntermediates, PLACEHOLDER_SCORE};
use fade_parity::parity::{
    quick_compare, save_npy, Comparator, ComparatorConfig, FailureReason, ReferenceArchive,
};
use fade_parity::utils::tensor_utils::{image_from_fn, random_image, scalar_matrix};

fn comparator_for(arrays: Vec<(&str, Tensor)>) -> Comparator {
    Comparator::from_archive(ReferenceArchive::from_arrays(arrays), ComparatorConfig::default())
}

fn filled(shape: (usize, usize), value: f64) -> Tensor {
    Tensor::full(value, shape, &Device::Cpu).unwrap()
}

/// Comparing an array against itself passes with zero difference
#[test]
fn test_self_comparison_passes() {
    let device = Device::Cpu;
    let r = Tensor::arange(0f64, 64f64, &device).unwrap().reshape((8, 8)).unwrap();
    let comparator = comparator_for(vec![("R", r.clone())]);

    let result = comparator.compare("R", &r).unwrap();
    assert!(result.passed);
    assert_eq!(result.max_abs_diff, Some(0.0));
    assert_eq!(result.total_elements, 64);
}

/// `ps = [[8]]` in the archive, computed `[[8]]`
#[test]
fn test_scalar_ps_passes() {
    let device = Device::Cpu;
    let comparator = comparator_for(vec![("ps", scalar_matrix(8, &device).unwrap())]);

    let result = comparator.compare("ps", &scalar_matrix(8, &device).unwrap()).unwrap();
    assert!(result.passed);
    assert_eq!(result.max_abs_diff, Some(0.0));
}

/// R of shape (256, 256) in the archive, computed (255, 256)
#[test]
fn test_shape_mismatch_fails_without_diff() {
    let comparator = comparator_for(vec![("R", filled((256, 256), 1.0))]);

    let result = comparator.compare("R", &filled((255, 256), 1.0)).unwrap();
    assert!(!result.passed);
    assert_eq!(result.failure, Some(FailureReason::ShapeMismatch));
    assert_eq!(result.expected_shape, Some(vec![256, 256]));
    assert_eq!(result.actual_shape, vec![255, 256]);
    assert_eq!(result.max_abs_diff, None);
    assert!(result.mismatches.is_empty());
}

/// Differing shapes fail regardless of values, including rank differences
#[test]
fn test_shape_mismatch_ignores_values() {
    let device = Device::Cpu;
    let comparator = comparator_for(vec![("x", Tensor::from_vec(vec![8i64], (1,), &device).unwrap())]);

    let result = comparator.compare("x", &scalar_matrix(8, &device).unwrap()).unwrap();
    assert!(result.is_shape_mismatch());
}

/// Absent names fail with VariableNotFound
#[test]
fn test_missing_variable() {
    let comparator = comparator_for(vec![("R", filled((2, 2), 0.0))]);

    let result = comparator.compare("Ig", &filled((2, 2), 0.0)).unwrap();
    assert!(!result.passed);
    assert_eq!(result.failure, Some(FailureReason::VariableNotFound));
}

/// A bad archive path still yields a comparator; every comparison fails
#[test]
fn test_unavailable_archive_degrades() {
    let comparator = Comparator::new("no/such/FADE_key_variables.safetensors");
    assert!(!comparator.is_available());

    let result = comparator.compare("ps", &scalar_matrix(8, &Device::Cpu).unwrap()).unwrap();
    assert!(!result.passed);
    assert!(matches!(result.failure, Some(FailureReason::ArchiveUnavailable(_))));
    assert!(result.summary().contains("archive unavailable"));

    let quick = quick_compare("ps", &scalar_matrix(8, &Device::Cpu).unwrap(), "no/such/dir").unwrap();
    assert!(matches!(quick.failure, Some(FailureReason::ArchiveUnavailable(_))));
}

/// Tolerance 1e-3: 5e-4 differences pass, 2e-3 differences fail
#[test]
fn test_tolerance_override() {
    let comparator = comparator_for(vec![("Ig", filled((4, 4), 10.0))]);

    let close = filled((4, 4), 10.0005);
    let result = comparator.compare_with_tolerance("Ig", &close, 1e-3).unwrap();
    assert!(result.passed);

    let far = filled((4, 4), 10.002);
    let result = comparator.compare_with_tolerance("Ig", &far, 1e-3).unwrap();
    assert!(!result.passed);
    assert_eq!(result.failure, Some(FailureReason::ToleranceExceeded));
    assert_eq!(result.num_mismatches, 16);
    assert_eq!(result.mismatches.len(), 5);
    assert_eq!(result.mismatches[0].index, vec![0, 0]);

    // The default tolerance rejects the small difference too
    let result = comparator.compare("Ig", &close).unwrap();
    assert!(!result.passed);
}

/// Same inputs give the same result
#[test]
fn test_compare_is_idempotent() {
    let comparator = comparator_for(vec![("G", filled((3, 3), 1.0))]);
    let actual = filled((3, 3), 1.5);

    let first = comparator.compare("G", &actual).unwrap();
    let second = comparator.compare("G", &actual).unwrap();
    assert_eq!(first, second);
}

/// Pass rate is passed / total, 1.0 when all pass, None for no input
#[test]
fn test_batch_aggregates() {
    let device = Device::Cpu;
    let comparator = comparator_for(vec![
        ("ps", scalar_matrix(8, &device).unwrap()),
        ("row", scalar_matrix(256, &device).unwrap()),
        ("R", filled((2, 2), 3.0)),
    ]);

    let all_good = vec![
        ("ps", scalar_matrix(8, &device).unwrap()),
        ("row", scalar_matrix(256, &device).unwrap()),
    ];
    let batch = comparator.compare_all(all_good).unwrap();
    assert_eq!(batch.pass_rate(), Some(1.0));
    assert!(batch.all_passed());

    let mixed = vec![
        ("ps", scalar_matrix(8, &device).unwrap()),
        ("row", scalar_matrix(255, &device).unwrap()),
        ("R", filled((2, 2), 3.0)),
        ("B", filled((2, 2), 3.0)),
    ];
    let batch = comparator.compare_all(mixed).unwrap();
    assert_eq!(batch.passed(), 2);
    assert_eq!(batch.total(), 4);
    assert_eq!(batch.pass_rate(), Some(0.5));
    let names: Vec<&str> = batch.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["ps", "row", "R", "B"]);
    assert_eq!(batch.get("B").unwrap().failure, Some(FailureReason::VariableNotFound));

    let empty: Vec<(&str, Tensor)> = Vec::new();
    let batch = comparator.compare_all(empty).unwrap();
    assert_eq!(batch.total(), 0);
    assert_eq!(batch.pass_rate(), None);
}

/// FADE intermediates saved as an npy directory check clean against a rerun
#[test]
fn test_fade_against_npy_archive() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let image = random_image(70, 45, 42, &device).unwrap();

    let reference = FadeIntermediates::compute(&image, 8).unwrap();
    for (name, tensor) in reference.setup_variables().unwrap().iter().chain(&reference.channel_variables()) {
        save_npy(dir.path().join(format!("{}.npy", name)), tensor).unwrap();
    }

    let fade = Fade::new(8).with_comparator(Comparator::new(dir.path()));
    let output = fade.evaluate(&image).unwrap();

    assert_eq!(output.score, PLACEHOLDER_SCORE);
    assert_eq!(output.parity.len(), 2);
    assert!(output.parity_passed());
    assert_eq!(output.parity[0].get("row").map(|r| r.passed), Some(true));
}

/// A reference gray channel with a perturbed pixel is reported at that pixel
#[test]
fn test_fade_reports_perturbed_gray() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("FADE_key_variables.safetensors");
    let image = image_from_fn(16, 16, &device, |y, x| [x as u8 * 10, y as u8 * 10, 50]).unwrap();

    let inter = FadeIntermediates::compute(&image, 8).unwrap();
    let mut gray = inter.gray.flatten_all().unwrap().to_vec1::<f64>().unwrap();
    gray[3 * 16 + 7] += 0.25;

    let mut tensors = HashMap::new();
    tensors.insert("Ig".to_string(), Tensor::from_vec(gray, (16, 16), &device).unwrap());
    tensors.insert("R".to_string(), inter.red.clone());
    safetensors::save(&tensors, &path).unwrap();

    let fade = Fade::new(8).with_comparator(Comparator::new(&path));
    let output = fade.evaluate(&image).unwrap();
    assert!(!output.parity_passed());

    let channels = &output.parity[1];
    assert!(channels.get("R").unwrap().passed);
    let ig = channels.get("Ig").unwrap();
    assert_eq!(ig.failure, Some(FailureReason::ToleranceExceeded));
    assert_eq!(ig.num_mismatches, 1);
    assert_eq!(ig.mismatches[0].index, vec![3, 7]);
    assert!((ig.max_abs_diff.unwrap() - 0.25).abs() < 1e-9);
    assert_eq!(channels.get("G").unwrap().failure, Some(FailureReason::VariableNotFound));
}

/// Integer reference data compares against float computations
#[test]
fn test_reference_dtype_is_recorded() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let channel = Tensor::from_vec(vec![1u8, 2, 3, 4], (2, 2), &device).unwrap();
    save_npy(dir.path().join("R.npy"), &channel).unwrap();

    let comparator = Comparator::new(dir.path());
    let computed = channel.to_dtype(DType::F64).unwrap();
    let result = comparator.compare("R", &computed).unwrap();

    assert!(result.passed);
    assert_eq!(result.expected_dtype.as_deref(), Some("uint8"));
    assert_eq!(result.actual_dtype, "float64");
}
